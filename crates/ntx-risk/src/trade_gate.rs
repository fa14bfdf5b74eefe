//! Per-order trade gate — the pre-order checks of spec.md §4.6 that sit
//! alongside (not instead of) the equity-based kill-switch engine in
//! `engine.rs`. Same shape: a pure `evaluate(config, &mut state, input) ->
//! TradeGateDecision` function, sticky state carried by the caller,
//! `checked_sub`/`checked_add` guarding every subtraction that could
//! underflow. `ntx-runtime` calls this once per candidate order, after the
//! equity-based `engine::evaluate` has already passed.

use crate::MICROS_SCALE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeGateConfig {
    pub consecutive_loss_limit: u32,
    pub max_risk_per_trade_micros: i64,
    pub max_open_positions: u32,
    pub max_trades_per_day: u32,
    pub require_stop_loss: bool,
    /// Minimum fraction (in basis points of order value) of available
    /// margin that must remain after the order, e.g. 2000 = 20%.
    pub min_available_margin_bps: i64,
}

impl TradeGateConfig {
    pub fn sane_defaults() -> Self {
        Self {
            consecutive_loss_limit: 3,
            max_risk_per_trade_micros: 5_000 * MICROS_SCALE,
            max_open_positions: 5,
            max_trades_per_day: 20,
            require_stop_loss: true,
            min_available_margin_bps: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeGateState {
    pub day_id: u32,
    pub consecutive_losses: u32,
    pub trades_today: u32,
    pub open_positions: u32,
    pub locked: bool,
}

impl TradeGateState {
    pub fn new(day_id: u32) -> Self {
        Self {
            day_id,
            consecutive_losses: 0,
            trades_today: 0,
            open_positions: 0,
            locked: false,
        }
    }

    /// Daily reset: called by the runtime at session start for a new
    /// trading day. Consecutive-loss lock and trade counters both clear;
    /// open position count carries over (positions don't vanish overnight).
    pub fn reset_for_day(&mut self, day_id: u32) {
        if day_id != self.day_id {
            self.day_id = day_id;
            self.trades_today = 0;
            self.locked = false;
            self.consecutive_losses = 0;
        }
    }

    /// Call after every closed trade with its realized PnL (micros).
    pub fn record_trade_result(&mut self, cfg: &TradeGateConfig, realized_pnl_micros: i64) {
        if realized_pnl_micros < 0 {
            self.consecutive_losses = self.consecutive_losses.saturating_add(1);
            if self.consecutive_losses >= cfg.consecutive_loss_limit {
                self.locked = true;
            }
        } else {
            self.consecutive_losses = 0;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeGateInput {
    pub day_id: u32,
    /// Order notional value (qty * price), in micros.
    pub order_value_micros: i64,
    /// Stop-loss distance in basis points of entry price; 0 means no stop.
    pub stop_loss_bps: i64,
    pub broker_connected: bool,
    pub market_open_or_paper_mode: bool,
    pub available_margin_micros: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TradeGateReason {
    Allowed,
    ConsecutiveLossLockActive,
    PerTradeRiskCapExceeded,
    MaxOpenPositionsReached,
    MaxTradesPerDayReached,
    MissingStopLoss,
    MarketClosed,
    BrokerNotConnected,
    InsufficientMargin,
    BadInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradeGateDecision {
    pub allowed: bool,
    pub reason: TradeGateReason,
}

/// Position-sizing helper: the maximum order value (micros) that keeps the
/// stop-loss risk within `max_risk_per_trade_micros`, given a stop-loss
/// distance in basis points. Returns `None` if `stop_loss_bps` is zero
/// (undefined risk) or the computation would overflow.
pub fn max_order_value_for_risk(max_risk_per_trade_micros: i64, stop_loss_bps: i64) -> Option<i64> {
    if stop_loss_bps <= 0 {
        return None;
    }
    (max_risk_per_trade_micros as i128)
        .checked_mul(10_000)
        .and_then(|v| v.checked_div(stop_loss_bps as i128))
        .and_then(|v| i64::try_from(v).ok())
}

pub fn evaluate(
    cfg: &TradeGateConfig,
    st: &mut TradeGateState,
    inp: &TradeGateInput,
) -> TradeGateDecision {
    if inp.order_value_micros <= 0 || inp.available_margin_micros < 0 {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::BadInput,
        };
    }

    st.reset_for_day(inp.day_id);

    if st.locked {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::ConsecutiveLossLockActive,
        };
    }

    if !inp.market_open_or_paper_mode {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::MarketClosed,
        };
    }

    if !inp.broker_connected {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::BrokerNotConnected,
        };
    }

    if cfg.require_stop_loss && inp.stop_loss_bps <= 0 {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::MissingStopLoss,
        };
    }

    if st.open_positions >= cfg.max_open_positions {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::MaxOpenPositionsReached,
        };
    }

    if st.trades_today >= cfg.max_trades_per_day {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::MaxTradesPerDayReached,
        };
    }

    if inp.stop_loss_bps > 0 {
        let risk_micros = match (inp.order_value_micros as i128)
            .checked_mul(inp.stop_loss_bps as i128)
            .and_then(|v| v.checked_div(10_000))
        {
            Some(v) => v,
            None => {
                return TradeGateDecision {
                    allowed: false,
                    reason: TradeGateReason::BadInput,
                }
            }
        };
        if risk_micros > cfg.max_risk_per_trade_micros as i128 {
            return TradeGateDecision {
                allowed: false,
                reason: TradeGateReason::PerTradeRiskCapExceeded,
            };
        }
    }

    let required_margin = match (inp.order_value_micros as i128)
        .checked_mul(cfg.min_available_margin_bps as i128)
        .and_then(|v| v.checked_div(10_000))
    {
        Some(v) => v,
        None => {
            return TradeGateDecision {
                allowed: false,
                reason: TradeGateReason::BadInput,
            }
        }
    };
    if (inp.available_margin_micros as i128) < required_margin {
        return TradeGateDecision {
            allowed: false,
            reason: TradeGateReason::InsufficientMargin,
        };
    }

    st.trades_today = st.trades_today.saturating_add(1);
    st.open_positions = st.open_positions.saturating_add(1);
    TradeGateDecision {
        allowed: true,
        reason: TradeGateReason::Allowed,
    }
}
