use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single tunable strategy parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(Decimal),
    Text(String),
}

impl ParamValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            ParamValue::Number(d) => Some(*d),
            ParamValue::Text(_) => None,
        }
    }

    /// Integer view for period-style parameters.
    pub fn as_usize(&self) -> Option<usize> {
        self.as_decimal().and_then(|d| d.to_usize())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s.as_str()),
            ParamValue::Number(_) => None,
        }
    }

    /// Parse a CLI-supplied value: numeric when it parses as a decimal,
    /// text otherwise.
    pub fn parse(raw: &str) -> ParamValue {
        match raw.parse::<Decimal>() {
            Ok(d) => ParamValue::Number(d),
            Err(_) => ParamValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(d) => write!(f, "{d}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<Decimal> for ParamValue {
    fn from(d: Decimal) -> Self {
        ParamValue::Number(d)
    }
}

impl From<usize> for ParamValue {
    fn from(n: usize) -> Self {
        ParamValue::Number(Decimal::from(n))
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// Ordered name → value mapping. The key set is fixed per strategy class;
/// ordering matters for the optimization tie-break.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// One swept parameter range: enumerates `from, from+step, ..., <= to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParam {
    pub name: String,
    pub from: Decimal,
    pub to: Decimal,
    pub step: Decimal,
}

impl OptimizationParam {
    pub fn new(
        name: impl Into<String>,
        from: Decimal,
        to: Decimal,
        step: Decimal,
    ) -> Result<Self, String> {
        if step <= Decimal::ZERO {
            return Err(format!("step must be > 0, got {step}"));
        }
        if from > to {
            return Err(format!("from ({from}) must be <= to ({to})"));
        }
        Ok(Self {
            name: name.into(),
            from,
            to,
            step,
        })
    }

    pub fn values(&self) -> Vec<Decimal> {
        let mut out = Vec::new();
        let mut v = self.from;
        while v <= self.to {
            out.push(v);
            v += self.step;
        }
        out
    }
}
