//! Built-in moving-average crossover strategy: long while the fast MA is
//! above the slow MA, flat otherwise. A thin, concrete alternative to
//! [`CustomStrategy`](crate::CustomStrategy) for the common case.

use ntx_execution::{StrategyOutput, TargetPosition};
use ntx_indicators::{ema_series, series_crossed_above, series_crossed_below, sma_series};

use crate::types::{Strategy, StrategyContext, StrategySpec};

const MICROS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaKind {
    Sma,
    Ema,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaCrossoverConfig {
    pub name: String,
    pub timeframe_secs: i64,
    pub fast_period: usize,
    pub slow_period: usize,
    pub kind: MaKind,
    pub order_qty: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PositionState {
    Flat,
    Long,
}

pub struct MaCrossoverStrategy {
    config: MaCrossoverConfig,
    symbol: String,
    state: PositionState,
}

impl MaCrossoverStrategy {
    pub fn new(symbol: impl Into<String>, config: MaCrossoverConfig) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            state: PositionState::Flat,
        }
    }
}

/// Returns the last two (fast, slow) pairs once both series have warmed up,
/// or `None` if either is still accumulating history.
fn last_two_pairs(fast: &[Option<f64>], slow: &[Option<f64>]) -> Option<([f64; 2], [f64; 2])> {
    let n = fast.len().min(slow.len());
    if n < 2 {
        return None;
    }
    let f1 = fast[n - 2]?;
    let s1 = slow[n - 2]?;
    let f2 = fast[n - 1]?;
    let s2 = slow[n - 1]?;
    Some(([f1, f2], [s1, s2]))
}

impl Strategy for MaCrossoverStrategy {
    fn spec(&self) -> StrategySpec {
        StrategySpec::new(self.config.name.clone(), self.config.timeframe_secs)
    }

    fn on_bar(&mut self, ctx: &StrategyContext) -> StrategyOutput {
        let closes: Vec<f64> = ctx
            .recent
            .bars
            .iter()
            .map(|b| b.close_micros as f64 / MICROS_PER_UNIT)
            .collect();

        let (fast_series, slow_series) = match self.config.kind {
            MaKind::Sma => (
                sma_series(&closes, self.config.fast_period),
                sma_series(&closes, self.config.slow_period),
            ),
            MaKind::Ema => (
                ema_series(&closes, self.config.fast_period),
                ema_series(&closes, self.config.slow_period),
            ),
        };

        let target_qty = match last_two_pairs(&fast_series, &slow_series) {
            None => match self.state {
                PositionState::Flat => 0,
                PositionState::Long => self.config.order_qty,
            },
            Some((fast, slow)) => match self.state {
                PositionState::Flat => {
                    if series_crossed_above(&fast, &slow) {
                        self.state = PositionState::Long;
                        self.config.order_qty
                    } else {
                        0
                    }
                }
                PositionState::Long => {
                    if series_crossed_below(&fast, &slow) {
                        self.state = PositionState::Flat;
                        0
                    } else {
                        self.config.order_qty
                    }
                }
            },
        };

        StrategyOutput::new(vec![TargetPosition::new(self.symbol.clone(), target_qty)])
    }
}
