//! Bar Pipeline: strategy evaluation → order-intent derivation → risk/trade
//! gates → conflict resolution → per-user queue, all for a single bar close
//! of a single (user, strategy, symbol) combination.
//!
//! This is the synchronous core called from the async bar-close task in
//! `engine.rs`. No broker I/O happens here — a `PipelineOutcome::Enqueued`
//! only means the intent reached the user's queue; dispatching off the
//! queue into `OrderExecutor` is the caller's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ntx_conflict::{ConflictConfig, ConflictState, ReasonCode as ConflictReasonCode, Signal as ConflictSignal};
use ntx_execution::{targets_to_order_intents, OrderIntent, PositionBook, Side};
use ntx_integrity::CalendarSpec;
use ntx_queue::{DedupKey, EnqueueOutcome, PerUserOrderQueue};
use ntx_risk::{
    evaluate as evaluate_risk, evaluate_trade_gate, ReasonCode as RiskReasonCode, RiskConfig, RiskInput,
    TradeGateConfig, TradeGateInput, TradeGateReason,
};
use ntx_strategy::{StrategyContext, StrategyHost};

use crate::gates::RiskRuntimeState;

/// Minimum signal confidence for a strategy's target to be acted upon
/// (spec: `confidence == 0.5` is acted upon, `0.499` is not).
const MIN_SIGNAL_CONFIDENCE: f64 = 0.5;

fn conflict_side(side: Side) -> ntx_conflict::Side {
    match side {
        Side::Buy => ntx_conflict::Side::Buy,
        Side::Sell => ntx_conflict::Side::Sell,
    }
}

/// What an intent was serialized into for transit through the queue's
/// opaque `Vec<u8>` payload. `OrderExecutor::submit_intent` reconstructs an
/// `OrderIntent` plus order-type/price hints from this.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedIntent {
    pub symbol: String,
    pub side: String,
    pub qty: i64,
    pub limit_price_micros: Option<i64>,
}

impl QueuedIntent {
    pub fn from_order_intent(intent: &OrderIntent, limit_price_micros: Option<i64>) -> Self {
        Self {
            symbol: intent.symbol.clone(),
            side: intent.side.to_string(),
            qty: intent.qty,
            limit_price_micros,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    /// No target-position change for this symbol this bar.
    NoOrders,
    /// Strategy is in shadow mode; intents were computed but not enqueued.
    Shadow,
    /// Outside the trading session and not bypassed for paper mode.
    MarketClosed,
    /// Signal confidence fell below the 0.5 acceptance threshold.
    LowConfidence(f64),
    RiskRejected(RiskReasonCode),
    TradeGateRejected(TradeGateReason),
    ConflictRejected(ConflictReasonCode),
    Enqueued(EnqueueOutcome),
}

/// Per-(user, strategy, symbol) pipeline state. One `BarPipeline` wraps
/// exactly one `StrategyHost` registration (Tier A: a host holds a single
/// strategy instance).
pub struct BarPipeline {
    pub user_id: String,
    pub strategy_id: String,
    host: StrategyHost,
    calendar: CalendarSpec,
}

impl BarPipeline {
    pub fn new(user_id: impl Into<String>, strategy_id: impl Into<String>, host: StrategyHost, calendar: CalendarSpec) -> Self {
        Self {
            user_id: user_id.into(),
            strategy_id: strategy_id.into(),
            host,
            calendar,
        }
    }

    /// Evaluate one bar close for every symbol the strategy emits a target
    /// for, threading each candidate intent through the risk, trade, and
    /// conflict gates before enqueueing it.
    #[allow(clippy::too_many_arguments)]
    pub fn process_bar(
        &mut self,
        ctx: &StrategyContext,
        current_positions: &PositionBook,
        bypass_market_hours: bool,
        now_ts: i64,
        minute_bucket: i64,
        risk_cfg: &RiskConfig,
        risk_state: &mut RiskRuntimeState,
        trade_gate_cfg: &TradeGateConfig,
        available_margin_micros: i64,
        stop_loss_bps: i64,
        conflict_cfg: &ConflictConfig,
        conflict_state: &mut ConflictState,
        queue: &mut PerUserOrderQueue,
    ) -> Result<Vec<PipelineOutcome>, ntx_strategy::StrategyHostError> {
        if !bypass_market_hours && !self.calendar.is_session_bar_end(now_ts) {
            return Ok(vec![PipelineOutcome::MarketClosed]);
        }

        let bar_result = self.host.on_bar(ctx)?;
        if !bar_result.intents.should_execute() {
            return Ok(vec![PipelineOutcome::Shadow]);
        }

        let decision = targets_to_order_intents(current_positions, &bar_result.intents.output);
        if decision.intents.is_empty() {
            return Ok(vec![PipelineOutcome::NoOrders]);
        }

        // Per-symbol confidence the strategy attached to its target, carried
        // forward onto the order intents derived from it (`targets_to_order_intents`
        // only tracks quantity deltas).
        let confidence_by_symbol: BTreeMap<&str, f64> = bar_result
            .intents
            .output
            .targets
            .iter()
            .map(|t| (t.symbol.as_str(), t.confidence))
            .collect();

        let day_id = (now_ts / 86_400) as u32;
        let mut outcomes = Vec::with_capacity(decision.intents.len());

        for intent in &decision.intents {
            let confidence = confidence_by_symbol.get(intent.symbol.as_str()).copied().unwrap_or(1.0);
            outcomes.push(self.gate_and_enqueue(
                intent,
                confidence,
                ctx,
                bypass_market_hours,
                day_id,
                now_ts,
                minute_bucket,
                risk_cfg,
                risk_state,
                trade_gate_cfg,
                available_margin_micros,
                stop_loss_bps,
                conflict_cfg,
                conflict_state,
                queue,
            ));
        }

        Ok(outcomes)
    }

    #[allow(clippy::too_many_arguments)]
    fn gate_and_enqueue(
        &self,
        intent: &OrderIntent,
        confidence: f64,
        ctx: &StrategyContext,
        bypass_market_hours: bool,
        day_id: u32,
        now_ts: i64,
        minute_bucket: i64,
        risk_cfg: &RiskConfig,
        risk_state: &mut RiskRuntimeState,
        trade_gate_cfg: &TradeGateConfig,
        available_margin_micros: i64,
        stop_loss_bps: i64,
        conflict_cfg: &ConflictConfig,
        conflict_state: &mut ConflictState,
        queue: &mut PerUserOrderQueue,
    ) -> PipelineOutcome {
        if confidence < MIN_SIGNAL_CONFIDENCE {
            return PipelineOutcome::LowConfidence(confidence);
        }

        let is_reducing = matches!(intent.side, Side::Sell);
        let risk_input = RiskInput {
            day_id,
            equity_micros: risk_state.risk.day_start_equity_micros,
            reject_window_id: day_id,
            request: ntx_risk::RequestKind::NewOrder,
            is_risk_reducing: is_reducing,
            pdt: ntx_risk::PdtContext::ok(),
            kill_switch: None,
        };
        let risk_decision = evaluate_risk(risk_cfg, &mut risk_state.risk, &risk_input);
        if !matches!(risk_decision.action, ntx_risk::RiskAction::Allow) {
            return PipelineOutcome::RiskRejected(risk_decision.reason);
        }

        let last_close = ctx.recent.last().map(|b| b.close_micros).unwrap_or(0);
        let order_value_micros = (intent.qty as i128 * last_close as i128).min(i64::MAX as i128) as i64;
        // New entries are blocked inside the mandatory 15:20 IST cutoff
        // (10 minutes before the 15:30 close); paper mode bypasses market
        // hours entirely, and a risk-reducing exit is never blocked by it.
        let past_entry_cutoff = !bypass_market_hours && !is_reducing && self.calendar.is_past_new_trade_cutoff(now_ts);
        let trade_gate_input = TradeGateInput {
            day_id,
            order_value_micros,
            stop_loss_bps,
            broker_connected: true,
            market_open_or_paper_mode: !past_entry_cutoff,
            available_margin_micros,
        };
        let trade_gate_decision = evaluate_trade_gate(trade_gate_cfg, &mut risk_state.trade_gate, &trade_gate_input);
        if !trade_gate_decision.allowed {
            return PipelineOutcome::TradeGateRejected(trade_gate_decision.reason);
        }

        let signal = ConflictSignal {
            user_id: self.user_id.clone(),
            symbol: intent.symbol.clone(),
            strategy_id: self.strategy_id.clone(),
            side: conflict_side(intent.side),
        };
        let conflict_decision = ntx_conflict::evaluate(conflict_cfg, conflict_state, &signal);
        if let ntx_conflict::ConflictDecision::Reject(reason) = conflict_decision {
            return PipelineOutcome::ConflictRejected(reason);
        }

        let queued = QueuedIntent::from_order_intent(intent, Some(last_close).filter(|p| *p > 0));
        let payload = serde_json::to_vec(&queued).unwrap_or_default();
        let dedup_key = DedupKey {
            user_id: self.user_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side.to_string(),
            strategy_id: self.strategy_id.clone(),
            minute_bucket,
        };
        // Priority derives from signal confidence (0..=1), not quantity.
        let priority = (confidence.clamp(0.0, 1.0) * 100.0).round() as i32;
        let outcome = queue.enqueue(dedup_key, priority, payload);
        let _ = now_ts;
        PipelineOutcome::Enqueued(outcome)
    }
}
