//! A strategy driven entirely by a declarative condition config, rather than
//! a bespoke `Strategy` impl — the "no-code" path: entry/exit condition
//! groups in, target position out.

use ntx_execution::{StrategyOutput, TargetPosition};

use crate::condition::{evaluate_group, Condition, Logic};
use crate::types::{Strategy, StrategyContext, StrategySpec};

const MICROS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct CustomStrategyConfig {
    pub name: String,
    pub timeframe_secs: i64,
    pub entry_conditions: Vec<Condition>,
    pub entry_logic: Logic,
    pub exit_conditions: Vec<Condition>,
    pub exit_logic: Logic,
    pub order_qty: i64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PositionState {
    Flat,
    Long,
}

/// Evaluates `config`'s entry/exit condition groups against the closing
/// prices in each bar window and emits a flat/long target position for
/// `symbol`. Long-only: shorting equity intraday needs margin/SLB handling
/// this crate doesn't model, so entries only ever go long.
pub struct CustomStrategy {
    config: CustomStrategyConfig,
    symbol: String,
    state: PositionState,
}

impl CustomStrategy {
    pub fn new(symbol: impl Into<String>, config: CustomStrategyConfig) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            state: PositionState::Flat,
        }
    }

    /// Stop-loss distance in basis points, for callers (the risk trade
    /// gate) that need it alongside the order this strategy emits.
    pub fn stop_loss_bps(&self) -> i64 {
        (self.config.stop_loss_pct * 100.0).round() as i64
    }

    /// Take-profit distance in basis points.
    pub fn take_profit_bps(&self) -> i64 {
        (self.config.take_profit_pct * 100.0).round() as i64
    }
}

impl Strategy for CustomStrategy {
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

        // Exits are risk-reducing and carry no graded condition confidence
        // of their own (the spec's 0.6-floor formula is entry-only), so a
        // closing or flat-holding bar always reports full confidence.
        let (target_qty, confidence) = match self.state {
            PositionState::Flat => {
                let (entered, confidence) =
                    evaluate_group(&self.config.entry_conditions, self.config.entry_logic, &closes);
                if entered {
                    self.state = PositionState::Long;
                    (scale_qty(self.config.order_qty, confidence), confidence)
                } else {
                    (0, confidence)
                }
            }
            PositionState::Long => {
                let (exited, _confidence) =
                    evaluate_group(&self.config.exit_conditions, self.config.exit_logic, &closes);
                if exited {
                    self.state = PositionState::Flat;
                    (0, 1.0)
                } else {
                    (self.config.order_qty, 1.0)
                }
            }
        };

        StrategyOutput::new(vec![TargetPosition::with_confidence(
            self.symbol.clone(),
            target_qty,
            confidence,
        )])
    }
}

fn scale_qty(order_qty: i64, confidence: f64) -> i64 {
    ((order_qty as f64) * confidence).round() as i64
}
