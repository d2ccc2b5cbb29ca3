use crate::application::strategies::{
    LongHoldStrategy, RsiReversionStrategy, SmaCrossStrategy, Strategy,
};
use crate::domain::errors::EngineError;
use crate::domain::params::ParamMap;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

type Factory = fn() -> Box<dyn Strategy>;

/// What `list-strategies` reports for one registered class.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParamMap,
    pub lookback: usize,
}

/// Typed plugin registry: strategy name → factory closure, populated at
/// process start. Parameters are validated at instantiation.
pub struct StrategyRegistry {
    entries: BTreeMap<&'static str, (Factory, &'static str)>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in strategy library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "long_hold",
            || Box::new(LongHoldStrategy::new()),
            "Buy and hold: enter long on the first close, hold to the end",
        );
        registry.register(
            "sma_cross",
            || Box::new(SmaCrossStrategy::default()),
            "Dual-SMA crossover: long on golden cross, flat on death cross",
        );
        registry.register(
            "rsi_reversion",
            || Box::new(RsiReversionStrategy::default()),
            "RSI mean reversion: long when oversold, exit when overbought",
        );
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: Factory, description: &'static str) {
        self.entries.insert(name, (factory, description));
    }

    pub fn list(&self) -> Vec<String> {
        self.entries.keys().map(|s| s.to_string()).collect()
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn describe(&self, name: &str) -> Result<StrategyDescriptor> {
        let (factory, description) = self
            .entries
            .get(name)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown strategy '{name}'")))?;
        let strategy = factory();
        Ok(StrategyDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            parameters: strategy.parameters(),
            lookback: strategy.max_lookback(),
        })
    }

    pub fn describe_all(&self) -> Vec<StrategyDescriptor> {
        self.entries
            .keys()
            .filter_map(|name| self.describe(name).ok())
            .collect()
    }

    /// Build a strategy with defaults ⊕ overrides.
    pub fn instantiate(&self, name: &str, overrides: &ParamMap) -> Result<Box<dyn Strategy>> {
        let (factory, _) = self
            .entries
            .get(name)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown strategy '{name}'")))?;
        let mut strategy = factory();
        strategy
            .apply_parameters(overrides)
            .map_err(|e| EngineError::InvalidInput(format!("strategy '{name}': {e}")))?;
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::ParamValue;

    #[test]
    fn test_builtins_listed() {
        let registry = StrategyRegistry::with_builtins();
        let names = registry.list();
        assert_eq!(names, vec!["long_hold", "rsi_reversion", "sma_cross"]);
        assert!(registry.is_valid("sma_cross"));
        assert!(!registry.is_valid("nope"));
    }

    #[test]
    fn test_describe_reports_defaults() {
        let registry = StrategyRegistry::with_builtins();
        let desc = registry.describe("sma_cross").unwrap();
        assert_eq!(desc.lookback, 50);
        assert_eq!(desc.parameters.get("fast"), Some(&ParamValue::from(20usize)));
    }

    #[test]
    fn test_instantiate_applies_overrides() {
        let registry = StrategyRegistry::with_builtins();
        let mut overrides = ParamMap::new();
        overrides.insert("fast".into(), ParamValue::from(5usize));
        overrides.insert("slow".into(), ParamValue::from(10usize));

        let strategy = registry.instantiate("sma_cross", &overrides).unwrap();
        assert_eq!(strategy.max_lookback(), 10);
    }

    #[test]
    fn test_unknown_strategy_is_invalid_input() {
        let registry = StrategyRegistry::with_builtins();
        let err = registry.instantiate("mystery", &ParamMap::new()).unwrap_err();
        let engine_err = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(engine_err, EngineError::InvalidInput(_)));
    }
}
