use rust_decimal::Decimal;

/// Shared statistics helpers over trade and equity series.
pub struct Stats;

impl Stats {
    /// Longest run of consecutive `true` values.
    pub fn max_consecutive(outcomes: impl Iterator<Item = bool>) -> u32 {
        let mut best = 0u32;
        let mut current = 0u32;
        for hit in outcomes {
            if hit {
                current += 1;
                best = best.max(current);
            } else {
                current = 0;
            }
        }
        best
    }

    pub fn mean(values: &[Decimal]) -> Decimal {
        if values.is_empty() {
            return Decimal::ZERO;
        }
        values.iter().sum::<Decimal>() / Decimal::from(values.len())
    }

    /// Percent change from `base` to `value`; zero when the base is zero.
    pub fn percent_change(base: Decimal, value: Decimal) -> Decimal {
        if base.is_zero() {
            return Decimal::ZERO;
        }
        (value - base) / base * Decimal::from(100)
    }

    /// Worst peak-to-trough point of an equity series, absolute and as a
    /// percent of the peak.
    pub fn max_drawdown(series: &[Decimal]) -> (Decimal, Decimal) {
        let mut peak = Decimal::MIN;
        let mut worst = (Decimal::ZERO, Decimal::ZERO);
        for &equity in series {
            if equity > peak {
                peak = equity;
            }
            let value = peak - equity;
            if value > worst.0 {
                let pct = if peak.is_zero() {
                    Decimal::ZERO
                } else {
                    value / peak * Decimal::from(100)
                };
                worst = (value, pct);
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_max_consecutive() {
        let outcomes = [true, true, false, true, true, true, false];
        assert_eq!(Stats::max_consecutive(outcomes.iter().copied()), 3);
        assert_eq!(Stats::max_consecutive(std::iter::empty()), 0);
        assert_eq!(Stats::max_consecutive([false, false].iter().copied()), 0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(Stats::mean(&[dec!(1), dec!(2), dec!(3)]), dec!(2));
        assert_eq!(Stats::mean(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(Stats::percent_change(dec!(1000), dec!(1100)), dec!(10));
        assert_eq!(Stats::percent_change(dec!(0), dec!(5)), Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_over_series() {
        // Peak 1200, trough 900 -> 300 absolute, 25%
        let series = [dec!(1000), dec!(1200), dec!(900), dec!(1100)];
        assert_eq!(Stats::max_drawdown(&series), (dec!(300), dec!(25)));
        assert_eq!(
            Stats::max_drawdown(&[]),
            (Decimal::ZERO, Decimal::ZERO)
        );
    }
}
