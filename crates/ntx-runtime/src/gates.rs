//! Gate wiring: thin adapters binding the per-component gate state
//! (`ArmState`, `RiskState` + `TradeGateState`, `ReconcileFreshnessGuard`)
//! to the three single-method traits [`ntx_execution::gateway`] requires
//! at its choke-point.
//!
//! Nothing here makes a decision itself — each wrapper answers
//! "has the owning component already decided to block?" by reading state
//! another task mutates. The actual risk/integrity/reconcile logic runs in
//! `pipeline.rs` and `reconciler.rs`, which call `ntx-risk`/`ntx-integrity`/
//! `ntx-reconcile` directly and update the shared state these wrappers read.

use std::sync::{Arc, Mutex};

use ntx_execution::{IntegrityGate, ReconcileFreshnessGuard, RiskGate};
use ntx_integrity::ArmState;
use ntx_risk::{RiskState, TradeGateState};

/// [`IntegrityGate`] backed by the shared [`ArmState`].
///
/// `BrokerGateway` calls `is_armed()` before every dispatch; the actual
/// arm/disarm transitions happen in `reconciler.rs` and the bar pipeline
/// when `ntx-integrity::engine` returns a Halt/Disarm decision.
#[derive(Clone)]
pub struct IntegrityGateImpl(pub Arc<Mutex<ArmState>>);

impl IntegrityGateImpl {
    pub fn new(state: Arc<Mutex<ArmState>>) -> Self {
        Self(state)
    }
}

impl IntegrityGate for IntegrityGateImpl {
    fn is_armed(&self) -> bool {
        self.0.lock().expect("arm state mutex poisoned").is_armed()
    }
}

/// Combined risk state the [`RiskGateImpl`] reads: the equity-based
/// kill-switch regime (`RiskState`) and the per-order trade gate
/// (`TradeGateState`). Both are sticky-halt state machines; either one
/// being tripped blocks dispatch.
pub struct RiskRuntimeState {
    pub risk: RiskState,
    pub trade_gate: TradeGateState,
}

impl RiskRuntimeState {
    pub fn new(day_id: u32, equity_micros: i64) -> Self {
        Self {
            risk: RiskState::new(day_id, equity_micros, day_id),
            trade_gate: TradeGateState::new(day_id),
        }
    }

    fn is_allowed(&self) -> bool {
        !self.risk.halted && !self.trade_gate.locked
    }
}

/// [`RiskGate`] backed by the shared [`RiskRuntimeState`].
#[derive(Clone)]
pub struct RiskGateImpl(pub Arc<Mutex<RiskRuntimeState>>);

impl RiskGateImpl {
    pub fn new(state: Arc<Mutex<RiskRuntimeState>>) -> Self {
        Self(state)
    }
}

impl RiskGate for RiskGateImpl {
    fn is_allowed(&self) -> bool {
        self.0.lock().expect("risk state mutex poisoned").is_allowed()
    }
}

/// The gateway's [`ntx_execution::gateway::ReconcileGate`] implementation.
///
/// `ReconcileFreshnessGuard` is already a complete, production-ready gate —
/// no wrapper logic is needed beyond picking a clock. `fn() -> i64` lets the
/// wall clock be a plain function pointer rather than a closure, keeping the
/// type nameable for use in `EngineConfig`-free call sites (tests can still
/// swap in a `Cell`-backed closure directly via `ReconcileFreshnessGuard::new`).
pub type ReconcileGateImpl = ReconcileFreshnessGuard<fn() -> i64>;

/// Wall clock: current epoch-milliseconds.
pub fn wall_clock_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_reconcile_gate(freshness_bound_ms: i64) -> ReconcileGateImpl {
    ReconcileFreshnessGuard::new(freshness_bound_ms, wall_clock_ms as fn() -> i64)
}
