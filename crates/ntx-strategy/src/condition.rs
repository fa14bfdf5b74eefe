//! Condition DSL for [`CustomStrategy`](crate::CustomStrategy): a tagged
//! indicator reference, a comparator, and a right-hand operand (another
//! indicator or a constant). Evaluated against the closing-price history in
//! a bar window — no open/high/low is available from [`BarStub`](crate::BarStub),
//! so the DSL only exposes close-derived indicators (no ATR, no VWAP).

const EQ_TOLERANCE: f64 = 0.01;

/// A named technical indicator, parameterized by period. All values are
/// derived from a closing-price series via `ntx-indicators`.
#[derive(Clone, Debug, PartialEq)]
pub enum Indicator {
    Price,
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    MacdLine {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    MacdSignal {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    BollingerUpper {
        period: usize,
        num_std: f64,
    },
    BollingerLower {
        period: usize,
        num_std: f64,
    },
}

/// The right-hand side of a [`Condition`]: either another indicator or a
/// fixed threshold.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Indicator(Indicator),
    Constant(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    CrossAbove,
    CrossBelow,
}

/// AND requires every condition in a group to hold; OR requires at least one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub left: Indicator,
    pub comparator: Comparator,
    pub right: Operand,
}

impl Condition {
    pub fn new(left: Indicator, comparator: Comparator, right: Operand) -> Self {
        Self {
            left,
            comparator,
            right,
        }
    }
}

fn indicator_value(ind: &Indicator, closes: &[f64]) -> Option<f64> {
    match ind {
        Indicator::Price => closes.last().copied(),
        Indicator::Sma(period) => ntx_indicators::sma(closes, *period),
        Indicator::Ema(period) => ntx_indicators::ema(closes, *period),
        Indicator::Rsi(period) => ntx_indicators::rsi(closes, *period),
        Indicator::MacdLine { fast, slow, signal } => {
            ntx_indicators::macd(closes, *fast, *slow, *signal).map(|m| m.macd)
        }
        Indicator::MacdSignal { fast, slow, signal } => {
            ntx_indicators::macd(closes, *fast, *slow, *signal).map(|m| m.signal)
        }
        Indicator::BollingerUpper { period, num_std } => {
            ntx_indicators::bollinger_bands(closes, *period, *num_std).map(|b| b.upper)
        }
        Indicator::BollingerLower { period, num_std } => {
            ntx_indicators::bollinger_bands(closes, *period, *num_std).map(|b| b.lower)
        }
    }
}

fn operand_value(op: &Operand, closes: &[f64]) -> Option<f64> {
    match op {
        Operand::Indicator(ind) => indicator_value(ind, closes),
        Operand::Constant(c) => Some(*c),
    }
}

/// Evaluates one condition against the full close history (most recent
/// point last). Missing indicator history (not enough bars yet) evaluates
/// to `false` rather than erroring — a strategy simply can't signal until
/// its indicators have warmed up.
pub fn evaluate_condition(cond: &Condition, closes: &[f64]) -> bool {
    match cond.comparator {
        Comparator::CrossAbove | Comparator::CrossBelow => {
            if closes.len() < 2 {
                return false;
            }
            let prev_closes = &closes[..closes.len() - 1];
            let (Some(l_prev), Some(l_last)) = (
                indicator_value(&cond.left, prev_closes),
                indicator_value(&cond.left, closes),
            ) else {
                return false;
            };
            let (Some(r_prev), Some(r_last)) = (
                operand_value(&cond.right, prev_closes),
                operand_value(&cond.right, closes),
            ) else {
                return false;
            };
            match cond.comparator {
                Comparator::CrossAbove => l_prev <= r_prev && l_last > r_last,
                Comparator::CrossBelow => l_prev >= r_prev && l_last < r_last,
                _ => unreachable!(),
            }
        }
        _ => {
            let (Some(l), Some(r)) = (
                indicator_value(&cond.left, closes),
                operand_value(&cond.right, closes),
            ) else {
                return false;
            };
            match cond.comparator {
                Comparator::Gt => l > r,
                Comparator::Lt => l < r,
                Comparator::Gte => l >= r,
                Comparator::Lte => l <= r,
                Comparator::Eq => (l - r).abs() <= EQ_TOLERANCE,
                Comparator::CrossAbove | Comparator::CrossBelow => unreachable!(),
            }
        }
    }
}

/// Entry confidence from the fraction of conditions that held: a 0.6 floor
/// plus up to 0.4 more as more of the group's conditions are met, capped at 1.0.
fn entry_confidence(met_fraction: f64) -> f64 {
    (0.6 + met_fraction * 0.4).min(1.0)
}

/// Evaluates a group of conditions under AND/OR logic. Returns whether the
/// group is satisfied plus the entry confidence derived from the fraction
/// of conditions that individually held.
pub fn evaluate_group(conditions: &[Condition], logic: Logic, closes: &[f64]) -> (bool, f64) {
    if conditions.is_empty() {
        return (false, 0.0);
    }
    let results: Vec<bool> = conditions
        .iter()
        .map(|c| evaluate_condition(c, closes))
        .collect();
    let satisfied = match logic {
        Logic::And => results.iter().all(|&b| b),
        Logic::Or => results.iter().any(|&b| b),
    };
    let met_fraction = results.iter().filter(|&&b| b).count() as f64 / results.len() as f64;
    (satisfied, entry_confidence(met_fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gt_compares_indicator_to_constant() {
        let cond = Condition::new(Indicator::Price, Comparator::Gt, Operand::Constant(5.0));
        assert!(evaluate_condition(&cond, &[4.0, 6.0]));
        assert!(!evaluate_condition(&cond, &[4.0, 4.0]));
    }

    #[test]
    fn eq_uses_tolerance() {
        let cond = Condition::new(Indicator::Price, Comparator::Eq, Operand::Constant(10.0));
        assert!(evaluate_condition(&cond, &[10.005]));
        assert!(!evaluate_condition(&cond, &[10.5]));
    }

    #[test]
    fn cross_above_requires_two_points_on_both_sides() {
        let cond = Condition::new(
            Indicator::Sma(2),
            Comparator::CrossAbove,
            Operand::Constant(3.0),
        );
        // sma(2) over [2,4] = 3.0 (not yet above); over [2,4,6]->sma=5.0 crosses above 3.0
        assert!(evaluate_condition(&cond, &[1.0, 2.0, 4.0, 6.0]));
    }

    #[test]
    fn missing_history_is_not_satisfied() {
        let cond = Condition::new(Indicator::Sma(20), Comparator::Gt, Operand::Constant(1.0));
        assert!(!evaluate_condition(&cond, &[1.0, 2.0]));
    }

    #[test]
    fn and_group_requires_all_conditions() {
        let conds = vec![
            Condition::new(Indicator::Price, Comparator::Gt, Operand::Constant(0.0)),
            Condition::new(Indicator::Price, Comparator::Lt, Operand::Constant(0.0)),
        ];
        let (satisfied, confidence) = evaluate_group(&conds, Logic::And, &[5.0]);
        assert!(!satisfied);
        assert_eq!(confidence, 0.8); // 0.6 + 0.5 met * 0.4
    }

    #[test]
    fn or_group_requires_one_condition() {
        let conds = vec![
            Condition::new(Indicator::Price, Comparator::Gt, Operand::Constant(0.0)),
            Condition::new(Indicator::Price, Comparator::Lt, Operand::Constant(0.0)),
        ];
        let (satisfied, confidence) = evaluate_group(&conds, Logic::Or, &[5.0]);
        assert!(satisfied);
        assert_eq!(confidence, 0.8); // 0.6 + 0.5 met * 0.4
    }

    #[test]
    fn all_conditions_met_reaches_full_confidence() {
        let conds = vec![Condition::new(Indicator::Price, Comparator::Gt, Operand::Constant(0.0))];
        let (satisfied, confidence) = evaluate_group(&conds, Logic::And, &[5.0]);
        assert!(satisfied);
        assert_eq!(confidence, 1.0); // 0.6 + 1.0 met * 0.4, capped at 1.0
    }
}
