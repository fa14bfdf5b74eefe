//! Order Executor: the per-user component that turns an [`OrderIntent`]
//! into a broker submission through the gateway choke-point, tracks its
//! OMS lifecycle, and applies fills to the portfolio ledger.
//!
//! One [`OrderExecutor`] instance per user. It owns the user's
//! [`BrokerOrderMap`], in-flight [`OmsOrder`]s, and [`Ledger`] — all
//! `Mutex`-guarded since fills and submits can race across tasks.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

use ntx_execution::{
    BrokerAdapter, BrokerGateway, BrokerOrderMap, BrokerSubmitRequest, OmsEvent, OmsOrder, OrderIntent,
    OrderState, OutboxClaimToken, Side,
};
use ntx_portfolio::{Fill as LedgerFill, Ledger, Side as LedgerSide};
use ntx_reconcile::{LocalSnapshot, OrderSnapshot, OrderStatus as ReconcileOrderStatus, Side as ReconcileSide};
use ntx_risk::TradeGateConfig;

use crate::gates::{IntegrityGateImpl, ReconcileGateImpl, RiskGateImpl, RiskRuntimeState};
use crate::reconciler::WatchedOrder;

fn to_ledger_side(side: Side) -> LedgerSide {
    match side {
        Side::Buy => LedgerSide::Buy,
        Side::Sell => LedgerSide::Sell,
    }
}

fn to_reconcile_side(side: Side) -> ReconcileSide {
    match side {
        Side::Buy => ReconcileSide::Buy,
        Side::Sell => ReconcileSide::Sell,
    }
}

fn to_reconcile_status(state: &OrderState) -> ReconcileOrderStatus {
    match state {
        OrderState::Open => ReconcileOrderStatus::Accepted,
        OrderState::PartiallyFilled => ReconcileOrderStatus::PartiallyFilled,
        OrderState::Filled => ReconcileOrderStatus::Filled,
        OrderState::CancelPending | OrderState::ReplacePending => ReconcileOrderStatus::Accepted,
        OrderState::Cancelled => ReconcileOrderStatus::Canceled,
        OrderState::Rejected => ReconcileOrderStatus::Rejected,
    }
}

/// Safely fold a signed `i64` order quantity into the `i32` the broker
/// adapter contract requires. Direction is carried by sign; magnitude is
/// clamped to `i32::MAX` rather than silently wrapping — an order this
/// large indicates a bug upstream, not a value the broker could accept
/// anyway.
fn signed_qty_i32(side: Side, qty: i64) -> i32 {
    let magnitude = qty.clamp(0, i32::MAX as i64) as i32;
    match side {
        Side::Buy => magnitude,
        Side::Sell => -magnitude,
    }
}

#[derive(Debug)]
pub enum ExecutorError {
    Broker(Box<dyn Error>),
    UnknownInternalId(String),
    IllegalOmsTransition(String),
    Ledger(ntx_portfolio::LedgerError),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Broker(e) => write!(f, "broker error: {e}"),
            ExecutorError::UnknownInternalId(id) => write!(f, "no tracked order for internal_id={id}"),
            ExecutorError::IllegalOmsTransition(msg) => write!(f, "illegal OMS transition: {msg}"),
            ExecutorError::Ledger(e) => write!(f, "ledger error: {e}"),
        }
    }
}

impl Error for ExecutorError {}

struct TrackedOrder {
    oms: OmsOrder,
    side: Side,
    placed_ts: i64,
    retries_done: u32,
}

pub struct OrderExecutor<B: BrokerAdapter> {
    gateway: BrokerGateway<B, IntegrityGateImpl, RiskGateImpl, ReconcileGateImpl>,
    map: Mutex<BrokerOrderMap>,
    orders: Mutex<HashMap<String, TrackedOrder>>,
    ledger: Mutex<Ledger>,
    risk_state: Arc<Mutex<RiskRuntimeState>>,
    trade_gate_cfg: TradeGateConfig,
}

impl<B: BrokerAdapter> OrderExecutor<B> {
    pub fn new(
        broker: B,
        integrity_gate: IntegrityGateImpl,
        risk_gate: RiskGateImpl,
        reconcile_gate: ReconcileGateImpl,
        risk_state: Arc<Mutex<RiskRuntimeState>>,
        initial_cash_micros: i64,
        trade_gate_cfg: TradeGateConfig,
    ) -> Self {
        Self {
            gateway: BrokerGateway::new(broker, integrity_gate, risk_gate, reconcile_gate),
            map: Mutex::new(BrokerOrderMap::new()),
            orders: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Ledger::new(initial_cash_micros)),
            risk_state,
            trade_gate_cfg,
        }
    }

    /// Submit an order intent. `claim` must come from a row already
    /// durably claimed via `ntx_db::outbox_claim_batch` — the gateway
    /// overrides the broker-visible order id with `claim.idempotency_key`
    /// (EB-3), so the internal tracking key here is always that claim key,
    /// never a locally generated one.
    pub fn submit_intent(
        &self,
        intent: &OrderIntent,
        claim: &OutboxClaimToken,
        order_type: &str,
        limit_price: Option<i64>,
        time_in_force: &str,
        now_ts: i64,
    ) -> Result<(), ExecutorError> {
        let req = BrokerSubmitRequest {
            order_id: claim.idempotency_key.clone(),
            symbol: intent.symbol.clone(),
            quantity: signed_qty_i32(intent.side, intent.qty),
            order_type: order_type.to_string(),
            limit_price,
            time_in_force: time_in_force.to_string(),
        };

        let resp = self.gateway.submit(claim, req).map_err(ExecutorError::Broker)?;

        let internal_id = claim.idempotency_key.clone();
        self.map.lock().expect("broker order map mutex poisoned").register(&internal_id, &resp.broker_order_id);

        let mut tracked = TrackedOrder {
            oms: OmsOrder::new(internal_id.clone(), intent.symbol.clone(), intent.qty),
            side: intent.side,
            placed_ts: now_ts,
            retries_done: 0,
        };
        tracked
            .oms
            .apply(&OmsEvent::Ack, Some(&format!("{internal_id}:ack")))
            .map_err(|e| ExecutorError::IllegalOmsTransition(e.to_string()))?;

        self.orders
            .lock()
            .expect("tracked orders mutex poisoned")
            .insert(internal_id, tracked);

        Ok(())
    }

    pub fn cancel_intent(&self, internal_id: &str) -> Result<(), ExecutorError> {
        let map = self.map.lock().expect("broker order map mutex poisoned");
        self.gateway.cancel(internal_id, &map).map_err(ExecutorError::Broker)?;
        drop(map);

        let mut orders = self.orders.lock().expect("tracked orders mutex poisoned");
        if let Some(tracked) = orders.get_mut(internal_id) {
            tracked
                .oms
                .apply(&OmsEvent::CancelRequest, None)
                .map_err(|e| ExecutorError::IllegalOmsTransition(e.to_string()))?;
        }
        Ok(())
    }

    /// Apply a fill event reported by the reconciler/broker feed.
    ///
    /// `is_final` marks the last fill for the order (total filled quantity
    /// reached). On a fill that both completes the order AND flattens the
    /// symbol's position, the per-order trade gate's `open_positions`
    /// counter is decremented and `record_trade_result` is called — the
    /// trade gate's own `evaluate()` only increments this counter on entry,
    /// it never decrements on exit, so the executor owns that bookkeeping.
    pub fn handle_fill(
        &self,
        internal_id: &str,
        delta_qty: i64,
        price_micros: i64,
        fee_micros: i64,
        is_final: bool,
        event_id: &str,
    ) -> Result<(), ExecutorError> {
        let side = {
            let mut orders = self.orders.lock().expect("tracked orders mutex poisoned");
            let tracked = orders
                .get_mut(internal_id)
                .ok_or_else(|| ExecutorError::UnknownInternalId(internal_id.to_string()))?;

            let event = if is_final {
                OmsEvent::Fill { delta_qty }
            } else {
                OmsEvent::PartialFill { delta_qty }
            };
            tracked
                .oms
                .apply(&event, Some(event_id))
                .map_err(|e| ExecutorError::IllegalOmsTransition(e.to_string()))?;

            if tracked.oms.state.is_terminal() {
                self.map.lock().expect("broker order map mutex poisoned").deregister(internal_id);
            }
            tracked.side
        };

        let symbol = {
            let orders = self.orders.lock().expect("tracked orders mutex poisoned");
            orders.get(internal_id).map(|t| t.oms.symbol.clone())
        };
        let Some(symbol) = symbol else {
            return Ok(());
        };

        let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
        let realized_before = ledger.realized_pnl_micros();
        ledger
            .append_fill(LedgerFill::new(symbol.clone(), to_ledger_side(side), delta_qty, price_micros, fee_micros))
            .map_err(ExecutorError::Ledger)?;
        let realized_after = ledger.realized_pnl_micros();
        let flat_now = ledger.qty_signed(&symbol) == 0;
        drop(ledger);

        if is_final && flat_now {
            let mut risk = self.risk_state.lock().expect("risk state mutex poisoned");
            risk.trade_gate.open_positions = risk.trade_gate.open_positions.saturating_sub(1);
            let realized_delta = realized_after - realized_before;
            risk.trade_gate.record_trade_result(&self.trade_gate_cfg, realized_delta);
        }

        Ok(())
    }

    pub fn ledger_snapshot(&self) -> ntx_portfolio::LedgerSnapshot {
        self.ledger.lock().expect("ledger mutex poisoned").snapshot()
    }

    /// Build the local side of a reconcile comparison from currently tracked
    /// orders and the ledger's position book.
    pub fn local_snapshot(&self) -> LocalSnapshot {
        let orders = self.orders.lock().expect("tracked orders mutex poisoned");
        let mut snapshot_orders = std::collections::BTreeMap::new();
        for (internal_id, tracked) in orders.iter() {
            snapshot_orders.insert(
                internal_id.clone(),
                OrderSnapshot::new(
                    internal_id.clone(),
                    tracked.oms.symbol.clone(),
                    to_reconcile_side(tracked.side),
                    tracked.oms.total_qty,
                    tracked.oms.filled_qty,
                    to_reconcile_status(&tracked.oms.state),
                ),
            );
        }
        drop(orders);

        let positions = self
            .ledger
            .lock()
            .expect("ledger mutex poisoned")
            .snapshot()
            .positions
            .into_iter()
            .map(|(symbol, pos)| (symbol, pos.qty_signed()))
            .collect();

        LocalSnapshot {
            orders: snapshot_orders,
            positions,
        }
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.lock().expect("tracked orders mutex poisoned").len()
    }

    /// Non-terminal tracked orders, for the reconciler's retry-tick sweep.
    pub fn watched_orders(&self) -> Vec<WatchedOrder> {
        self.orders
            .lock()
            .expect("tracked orders mutex poisoned")
            .iter()
            .filter(|(_, t)| !t.oms.state.is_terminal())
            .map(|(internal_id, t)| WatchedOrder {
                internal_id: internal_id.clone(),
                placed_ts: t.placed_ts,
                requested_qty: t.oms.total_qty,
                filled_qty: t.oms.filled_qty,
                retries_done: t.retries_done,
            })
            .collect()
    }

    /// Bump the resubmit counter after the reconciler issues a `Retry`
    /// action for this order.
    pub fn record_retry_attempt(&self, internal_id: &str) {
        if let Some(tracked) = self.orders.lock().expect("tracked orders mutex poisoned").get_mut(internal_id) {
            tracked.retries_done += 1;
        }
    }
}
