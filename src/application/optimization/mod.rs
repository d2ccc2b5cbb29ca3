use crate::application::backtest::Simulator;
use crate::application::strategies::StrategyRegistry;
use crate::domain::errors::EngineError;
use crate::domain::params::{OptimizationParam, ParamMap, ParamValue};
use crate::domain::performance::PerformanceMetrics;
use crate::domain::trading::Ledger;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{info, warn};

/// One combination's outcome. Failed combinations carry the error and
/// rank after every successful one.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub parameters: ParamMap,
    pub metrics: Option<PerformanceMetrics>,
    pub final_equity: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    /// Ranked best-first: net profit desc, then lower max drawdown
    /// percent, then lexicographic parameter vector.
    pub results: Vec<SweepResult>,
    pub combinations_total: usize,
    pub succeeded: usize,
    pub cancelled: bool,
}

impl OptimizationReport {
    pub fn best(&self) -> Option<&SweepResult> {
        self.results.iter().find(|r| r.metrics.is_some())
    }
}

/// Cartesian product of the parameter value lists, in declaration order.
pub fn enumerate_combinations(params: &[OptimizationParam]) -> Vec<ParamMap> {
    let mut combos = vec![ParamMap::new()];
    for param in params {
        let values = param.values();
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in &values {
                let mut extended = combo.clone();
                extended.insert(param.name.clone(), ParamValue::Number(*value));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Run every combination sequentially, each against a fresh strategy and
/// ledger. `cancelled` is polled before each combination; completed
/// combinations are preserved on cancellation.
#[allow(clippy::too_many_arguments)]
pub fn run_sweep(
    registry: &StrategyRegistry,
    strategy_name: &str,
    base_params: &ParamMap,
    sweep: &[OptimizationParam],
    simulator: &Simulator,
    start: NaiveDate,
    end: NaiveDate,
    initial_capital: Decimal,
    mut cancelled: impl FnMut() -> bool,
) -> Result<OptimizationReport, EngineError> {
    if sweep.is_empty() {
        return Err(EngineError::InvalidInput(
            "optimization requires at least one parameter range".into(),
        ));
    }

    let combos = enumerate_combinations(sweep);
    let total = combos.len();
    info!(strategy = strategy_name, combinations = total, "starting sweep");

    let mut results = Vec::with_capacity(total);
    let mut was_cancelled = false;

    for (i, combo) in combos.into_iter().enumerate() {
        if cancelled() {
            warn!(completed = i, total, "sweep cancelled");
            was_cancelled = true;
            break;
        }

        let mut params = base_params.clone();
        params.extend(combo.clone());

        let outcome = registry
            .instantiate(strategy_name, &params)
            .map_err(|e| e.to_string())
            .and_then(|mut strategy| {
                let mut ledger = Ledger::new(initial_capital);
                simulator
                    .run(strategy.as_mut(), &mut ledger, start, end)
                    .map_err(|e| e.to_string())
            });

        match outcome {
            Ok(sim) => results.push(SweepResult {
                parameters: combo,
                metrics: Some(sim.metrics),
                final_equity: Some(sim.final_equity),
                error: None,
            }),
            Err(message) => {
                warn!(combination = i, %message, "combination failed, continuing");
                results.push(SweepResult {
                    parameters: combo,
                    metrics: None,
                    final_equity: None,
                    error: Some(message),
                });
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.metrics.is_some()).count();
    rank(&mut results);

    Ok(OptimizationReport {
        results,
        combinations_total: total,
        succeeded,
        cancelled: was_cancelled,
    })
}

fn rank(results: &mut [SweepResult]) {
    results.sort_by(|a, b| match (&a.metrics, &b.metrics) {
        (Some(ma), Some(mb)) => mb
            .net_profit
            .cmp(&ma.net_profit)
            .then(ma.max_drawdown_percent.cmp(&mb.max_drawdown_percent))
            .then_with(|| cmp_param_maps(&a.parameters, &b.parameters)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => cmp_param_maps(&a.parameters, &b.parameters),
    });
}

/// Lexicographic by parameter name, then by value.
fn cmp_param_maps(a: &ParamMap, b: &ParamMap) -> Ordering {
    let mut ai = a.iter();
    let mut bi = b.iter();
    loop {
        match (ai.next(), bi.next()) {
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = ka.cmp(kb).then_with(|| cmp_param_values(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

fn cmp_param_values(a: &ParamValue, b: &ParamValue) -> Ordering {
    match (a, b) {
        (ParamValue::Number(x), ParamValue::Number(y)) => x.cmp(y),
        (ParamValue::Text(x), ParamValue::Text(y)) => x.cmp(y),
        (ParamValue::Number(_), ParamValue::Text(_)) => Ordering::Less,
        (ParamValue::Text(_), ParamValue::Number(_)) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn param(name: &str, from: Decimal, to: Decimal, step: Decimal) -> OptimizationParam {
        OptimizationParam::new(name, from, to, step).unwrap()
    }

    #[test]
    fn test_cartesian_coverage() {
        // 3 x 2 = 6 combinations
        let combos = enumerate_combinations(&[
            param("a", dec!(1), dec!(3), dec!(1)),
            param("b", dec!(10), dec!(20), dec!(10)),
        ]);
        assert_eq!(combos.len(), 6);

        // First combination carries both parameter names
        assert_eq!(combos[0].get("a"), Some(&ParamValue::Number(dec!(1))));
        assert_eq!(combos[0].get("b"), Some(&ParamValue::Number(dec!(10))));
        // Last combination is the final value of each range
        assert_eq!(combos[5].get("a"), Some(&ParamValue::Number(dec!(3))));
        assert_eq!(combos[5].get("b"), Some(&ParamValue::Number(dec!(20))));
    }

    #[test]
    fn test_single_param_sweep_shape() {
        // 50..250 step 50 -> {50, 100, 150, 200, 250}
        let combos = enumerate_combinations(&[param("length", dec!(50), dec!(250), dec!(50))]);
        assert_eq!(combos.len(), 5);
    }

    #[test]
    fn test_ranking_ties_break_on_drawdown_then_params() {
        let metrics = |net: Decimal, dd: Decimal| {
            let mut m =
                PerformanceMetrics::compute(&[], dec!(1000), (Decimal::ZERO, Decimal::ZERO));
            m.net_profit = net;
            m.max_drawdown_percent = dd;
            m
        };
        let result = |net: Decimal, dd: Decimal, length: Decimal| SweepResult {
            parameters: ParamMap::from([(
                "length".to_string(),
                ParamValue::Number(length),
            )]),
            metrics: Some(metrics(net, dd)),
            final_equity: None,
            error: None,
        };

        let mut results = vec![
            result(dec!(100), dec!(5), dec!(200)),
            result(dec!(100), dec!(2), dec!(150)),
            result(dec!(300), dec!(9), dec!(50)),
            result(dec!(100), dec!(2), dec!(100)),
        ];
        rank(&mut results);

        // Highest net profit first
        assert_eq!(results[0].metrics.as_ref().unwrap().net_profit, dec!(300));
        // Tie on net profit: lower drawdown wins; then smaller length
        assert_eq!(
            results[1].parameters.get("length"),
            Some(&ParamValue::Number(dec!(100)))
        );
        assert_eq!(
            results[2].parameters.get("length"),
            Some(&ParamValue::Number(dec!(150)))
        );
        assert_eq!(
            results[3].parameters.get("length"),
            Some(&ParamValue::Number(dec!(200)))
        );
    }

    #[test]
    fn test_failed_results_rank_last() {
        let mut results = vec![
            SweepResult {
                parameters: ParamMap::new(),
                metrics: None,
                final_equity: None,
                error: Some("boom".into()),
            },
            SweepResult {
                parameters: ParamMap::new(),
                metrics: Some(PerformanceMetrics::compute(
                    &[],
                    dec!(1000),
                    (Decimal::ZERO, Decimal::ZERO),
                )),
                final_equity: Some(dec!(1000)),
                error: None,
            },
        ];
        rank(&mut results);
        assert!(results[0].metrics.is_some());
        assert!(results[1].error.is_some());
    }
}
