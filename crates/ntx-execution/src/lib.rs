//! ntx-execution
//!
//! PATCH 05: Execution Engine Contract (Target Position Model)
//! - Strategies output target positions (not orders)
//! - Engine converts (current_positions, targets) -> order intents
//! - Pure deterministic logic, no broker wiring

mod engine;
mod gateway;
mod id_map;
mod oms;
mod order_router;
mod prices;
mod reconcile_guard;
mod types;

pub use engine::targets_to_order_intents;
pub use gateway::{
    intent_id_to_client_order_id, BrokerAdapter, BrokerCancelResponse, BrokerGateway,
    BrokerInvokeToken, BrokerReplaceRequest, BrokerReplaceResponse, BrokerSubmitRequest,
    BrokerSubmitResponse, GateRefusal, IntegrityGate, OutboxClaimToken, ReconcileGate, RiskGate,
    UnknownOrder,
};
#[cfg(feature = "testkit")]
pub use gateway::PassGate;
pub use id_map::BrokerOrderMap;
pub use oms::state_machine::{OmsEvent, OmsOrder, OrderState, TransitionError};
pub use prices::{micros_to_price, price_to_micros, PricingError, MICROS_PER_UNIT};
pub use reconcile_guard::ReconcileFreshnessGuard;
pub use types::{
    ExecutionDecision, OrderIntent, Side, StrategyOutput, TargetPosition,
};

use std::collections::BTreeMap;

/// Canonical type for current positions, keyed by symbol.
/// Signed quantity: +long, -short.
pub type PositionBook = BTreeMap<String, i64>;

/// Helper to build a PositionBook with minimal boilerplate in tests/callers.
pub fn position_book<I, S>(items: I) -> PositionBook
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut book = PositionBook::new();
    for (sym, qty) in items {
        book.insert(sym.into(), qty);
    }
    book
}
