//! Broker dispatch choke-point — Patch L1/B3/E2.
//!
//! `BrokerGateway` is the single place order submit/cancel/replace calls
//! reach a [`BrokerAdapter`]. Every call evaluates three independent gates,
//! in a fixed order (integrity, then risk, then reconcile), before routing
//! to `OrderRouter`. Callers cannot construct a [`BrokerInvokeToken`] or
//! bypass the gates: the token's inner field is `pub(crate)`, so the only
//! legal instance is the one `BrokerGateway` manufactures for each call.
//!
//! # Gate traits
//!
//! `IntegrityGate`, `RiskGate`, and `ReconcileGate` are implemented against
//! whatever state each subsystem already owns (e.g. `ntx_integrity`'s
//! `IntegrityState`, the trade-gate's sticky risk state, a reconcile
//! freshness guard). `BrokerGateway` is generic over all three so production
//! wiring can plug in the real implementations while tests use boolean
//! stubs — see `tests/scenario_gateway_no_bypass.rs`.
//!
//! # Outbox-first submit (EB-3)
//!
//! `submit` takes an [`OutboxClaimToken`] rather than a bare request: the
//! claim's `idempotency_key` always overrides `req.order_id` before the
//! request reaches the broker, so a dispatcher can never submit with an ID
//! that was not first durably recorded in `oms_outbox`.

use std::error::Error;
use std::fmt;

use crate::id_map::BrokerOrderMap;
use crate::order_router::OrderRouter;

/// Proof that a broker call originated from inside `BrokerGateway`.
///
/// The inner field is `pub(crate)`, so no code outside this crate can
/// construct one via a struct literal. Adapters receive a `&BrokerInvokeToken`
/// purely as an unforgeable capability; they never need to inspect it.
pub struct BrokerInvokeToken(pub(crate) ());

impl BrokerInvokeToken {
    /// Test-only escape hatch for adapter unit tests that call
    /// `BrokerAdapter` methods directly, outside a `BrokerGateway`.
    #[cfg(feature = "testkit")]
    pub fn for_test() -> Self {
        Self(())
    }
}

/// Proof that an outbox row was claimed via `ntx_db::outbox_claim_batch`.
///
/// The `_priv` field blocks external struct-literal construction; the only
/// legal way to build one is [`OutboxClaimToken::from_claimed_row`].
#[derive(Clone, Debug)]
pub struct OutboxClaimToken {
    _priv: (),
    pub outbox_id: i64,
    pub idempotency_key: String,
}

impl OutboxClaimToken {
    /// Build a claim token from a claimed `oms_outbox` row's fields.
    pub fn from_claimed_row(outbox_id: i64, idempotency_key: &str) -> Self {
        Self {
            _priv: (),
            outbox_id,
            idempotency_key: idempotency_key.to_string(),
        }
    }

    #[cfg(feature = "testkit")]
    pub fn for_test(outbox_id: i64, idempotency_key: &str) -> Self {
        Self::from_claimed_row(outbox_id, idempotency_key)
    }
}

// ---------------------------------------------------------------------------
// Gate traits
// ---------------------------------------------------------------------------

/// Armed/disarmed state of the data-integrity engine.
pub trait IntegrityGate {
    fn is_armed(&self) -> bool;
}

/// Pre-trade risk gate state.
pub trait RiskGate {
    fn is_allowed(&self) -> bool;
}

/// Broker/local reconcile freshness and cleanliness.
pub trait ReconcileGate {
    fn is_clean(&self) -> bool;
}

/// Why a broker operation was refused at the gate, before it ever reached
/// the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateRefusal {
    IntegrityDisarmed,
    RiskBlocked,
    ReconcileNotClean,
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRefusal::IntegrityDisarmed => write!(f, "GATE_REFUSED: integrity disarmed or halted"),
            GateRefusal::RiskBlocked => write!(f, "GATE_REFUSED: risk engine did not allow"),
            GateRefusal::ReconcileNotClean => write!(f, "GATE_REFUSED: reconcile is not clean"),
        }
    }
}

impl Error for GateRefusal {}

/// A cancel/replace target whose internal ID has no entry in the
/// [`BrokerOrderMap`] — either never submitted by this system, or already
/// deregistered after reaching a terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownOrder {
    pub internal_id: String,
}

impl fmt::Display for UnknownOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CANCEL_REPLACE_REFUSED: no broker mapping for internal_id={}",
            self.internal_id
        )
    }
}

impl Error for UnknownOrder {}

// ---------------------------------------------------------------------------
// Broker adapter contract
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerSubmitRequest {
    pub order_id: String,
    pub symbol: String,
    pub quantity: i32,
    pub order_type: String,
    /// Limit price in integer micros (see `crate::prices`). `None` for market orders.
    pub limit_price: Option<i64>,
    pub time_in_force: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerSubmitResponse {
    pub broker_order_id: String,
    pub submitted_at: u64,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerCancelResponse {
    pub broker_order_id: String,
    pub cancelled_at: u64,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerReplaceRequest {
    pub broker_order_id: String,
    pub quantity: i32,
    pub limit_price: Option<i64>,
    pub time_in_force: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerReplaceResponse {
    pub broker_order_id: String,
    pub replaced_at: u64,
    pub status: String,
}

/// Synchronous broker adapter contract.
///
/// Every method takes a `&BrokerInvokeToken` that only `BrokerGateway` can
/// manufacture — an adapter cannot be called without first clearing the
/// three gates.
pub trait BrokerAdapter {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse, Box<dyn Error>>;

    fn cancel_order(
        &self,
        order_id: &str,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse, Box<dyn Error>>;

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse, Box<dyn Error>>;
}

// ---------------------------------------------------------------------------
// BrokerGateway
// ---------------------------------------------------------------------------

/// The non-bypassable choke-point for all broker dispatch (EB-1).
///
/// `OrderRouter` is held `pub(crate)` so no external code can reach the
/// adapter without going through `enforce_gates`.
pub struct BrokerGateway<B, IntegrityG, RiskG, ReconcileG> {
    router: OrderRouter<B>,
    integrity_gate: IntegrityG,
    risk_gate: RiskG,
    reconcile_gate: ReconcileG,
}

impl<B, IntegrityG, RiskG, ReconcileG> BrokerGateway<B, IntegrityG, RiskG, ReconcileG>
where
    B: BrokerAdapter,
    IntegrityG: IntegrityGate,
    RiskG: RiskGate,
    ReconcileG: ReconcileGate,
{
    pub fn new(broker: B, integrity_gate: IntegrityG, risk_gate: RiskG, reconcile_gate: ReconcileG) -> Self {
        Self {
            router: OrderRouter::new(broker),
            integrity_gate,
            risk_gate,
            reconcile_gate,
        }
    }

    /// Evaluate all three gates in order: integrity, then risk, then
    /// reconcile. Integrity is always the first failure reported when
    /// more than one gate is down.
    fn enforce_gates(&self) -> Result<(), GateRefusal> {
        if !self.integrity_gate.is_armed() {
            return Err(GateRefusal::IntegrityDisarmed);
        }
        if !self.risk_gate.is_allowed() {
            return Err(GateRefusal::RiskBlocked);
        }
        if !self.reconcile_gate.is_clean() {
            return Err(GateRefusal::ReconcileNotClean);
        }
        Ok(())
    }

    /// Submit a new order. `claim.idempotency_key` overrides
    /// `req.order_id` (EB-3) so the broker always sees the key that was
    /// durably claimed from the outbox.
    pub fn submit(
        &self,
        claim: &OutboxClaimToken,
        mut req: BrokerSubmitRequest,
    ) -> Result<BrokerSubmitResponse, Box<dyn Error>> {
        self.enforce_gates()?;
        req.order_id = claim.idempotency_key.clone();
        let token = BrokerInvokeToken(());
        self.router.route_submit(req, &token)
    }

    /// Cancel a previously submitted order by internal ID. `map` must
    /// contain the internal→broker mapping registered at submit time.
    pub fn cancel(
        &self,
        internal_id: &str,
        map: &BrokerOrderMap,
    ) -> Result<BrokerCancelResponse, Box<dyn Error>> {
        self.enforce_gates()?;
        let broker_id = map.broker_id(internal_id).ok_or_else(|| UnknownOrder {
            internal_id: internal_id.to_string(),
        })?;
        let token = BrokerInvokeToken(());
        self.router.route_cancel(broker_id, &token)
    }

    /// Replace (amend) a previously submitted order by internal ID.
    pub fn replace(
        &self,
        internal_id: &str,
        map: &BrokerOrderMap,
        new_qty: i32,
        limit_price: Option<i64>,
        time_in_force: String,
    ) -> Result<BrokerReplaceResponse, Box<dyn Error>> {
        self.enforce_gates()?;
        let broker_id = map.broker_id(internal_id).ok_or_else(|| UnknownOrder {
            internal_id: internal_id.to_string(),
        })?;
        let token = BrokerInvokeToken(());
        let req = BrokerReplaceRequest {
            broker_order_id: broker_id.to_string(),
            quantity: new_qty,
            limit_price,
            time_in_force,
        };
        self.router.route_replace(req, &token)
    }
}

/// Always-pass gate, for test/harness wiring only.
#[cfg(feature = "testkit")]
pub struct PassGate;

#[cfg(feature = "testkit")]
impl IntegrityGate for PassGate {
    fn is_armed(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl RiskGate for PassGate {
    fn is_allowed(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl ReconcileGate for PassGate {
    fn is_clean(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl<B: BrokerAdapter> BrokerGateway<B, PassGate, PassGate, PassGate> {
    /// Test-only constructor: wires an adapter behind three always-pass gates.
    pub fn for_test(broker: B) -> Self {
        Self::new(broker, PassGate, PassGate, PassGate)
    }
}

// ---------------------------------------------------------------------------
// Idempotency derivation
// ---------------------------------------------------------------------------

/// Derive the stable `client_order_id` for a given intent ID.
///
/// This is the canonical derivation point: every call-site — first submit
/// or any subsequent retry — must use this function. Because the mapping is
/// deterministic (same `intent_id` implies same output), retries automatically
/// reuse the same key, preventing broker-side duplicate submission.
pub fn intent_id_to_client_order_id(intent_id: &str) -> String {
    intent_id.to_string()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOkBroker;

    impl BrokerAdapter for AlwaysOkBroker {
        fn submit_order(
            &self,
            req: BrokerSubmitRequest,
            _token: &BrokerInvokeToken,
        ) -> Result<BrokerSubmitResponse, Box<dyn Error>> {
            Ok(BrokerSubmitResponse {
                broker_order_id: format!("b-{}", req.order_id),
                submitted_at: 1,
                status: "ok".to_string(),
            })
        }

        fn cancel_order(
            &self,
            order_id: &str,
            _token: &BrokerInvokeToken,
        ) -> Result<BrokerCancelResponse, Box<dyn Error>> {
            Ok(BrokerCancelResponse {
                broker_order_id: order_id.to_string(),
                cancelled_at: 1,
                status: "ok".to_string(),
            })
        }

        fn replace_order(
            &self,
            req: BrokerReplaceRequest,
            _token: &BrokerInvokeToken,
        ) -> Result<BrokerReplaceResponse, Box<dyn Error>> {
            Ok(BrokerReplaceResponse {
                broker_order_id: req.broker_order_id,
                replaced_at: 1,
                status: "ok".to_string(),
            })
        }
    }

    struct BoolGate(bool);
    impl IntegrityGate for BoolGate {
        fn is_armed(&self) -> bool {
            self.0
        }
    }
    impl RiskGate for BoolGate {
        fn is_allowed(&self) -> bool {
            self.0
        }
    }
    impl ReconcileGate for BoolGate {
        fn is_clean(&self) -> bool {
            self.0
        }
    }

    fn make_submit_req() -> BrokerSubmitRequest {
        BrokerSubmitRequest {
            order_id: "ord-1".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 10,
            order_type: "market".to_string(),
            limit_price: None,
            time_in_force: "day".to_string(),
        }
    }

    fn gw(i: bool, r: bool, c: bool) -> BrokerGateway<AlwaysOkBroker, BoolGate, BoolGate, BoolGate> {
        BrokerGateway::new(AlwaysOkBroker, BoolGate(i), BoolGate(r), BoolGate(c))
    }

    #[test]
    fn all_clear_submit_succeeds() {
        let res = gw(true, true, true).submit(&OutboxClaimToken::from_claimed_row(1, "ord-1"), make_submit_req());
        assert!(res.is_ok());
    }

    #[test]
    fn integrity_disarmed_blocks_submit() {
        let err = gw(false, true, true)
            .submit(&OutboxClaimToken::from_claimed_row(1, "ord-1"), make_submit_req())
            .unwrap_err();
        assert!(err.to_string().contains("integrity disarmed"));
    }

    #[test]
    fn risk_blocked_blocks_submit() {
        let err = gw(true, false, true)
            .submit(&OutboxClaimToken::from_claimed_row(1, "ord-1"), make_submit_req())
            .unwrap_err();
        assert!(err.to_string().contains("risk engine"));
    }

    #[test]
    fn reconcile_not_clean_blocks_submit() {
        let err = gw(true, true, false)
            .submit(&OutboxClaimToken::from_claimed_row(1, "ord-1"), make_submit_req())
            .unwrap_err();
        assert!(err.to_string().contains("reconcile"));
    }

    #[test]
    fn integrity_checked_before_risk() {
        let err = gw(false, false, false)
            .submit(&OutboxClaimToken::from_claimed_row(1, "ord-1"), make_submit_req())
            .unwrap_err();
        assert!(err.to_string().contains("integrity disarmed"));
    }

    #[test]
    fn all_clear_cancel_succeeds() {
        let mut map = BrokerOrderMap::new();
        map.register("ord-1", "b-ord-1");
        let res = gw(true, true, true).cancel("ord-1", &map);
        assert!(res.is_ok());
    }

    #[test]
    fn integrity_disarmed_blocks_cancel() {
        let map = BrokerOrderMap::new();
        let err = gw(false, true, true).cancel("ord-1", &map).unwrap_err();
        assert!(err.to_string().contains("integrity disarmed"));
    }

    #[test]
    fn all_clear_replace_succeeds() {
        let mut map = BrokerOrderMap::new();
        map.register("ord-1", "b-ord-1");
        let res = gw(true, true, true).replace("ord-1", &map, 20, None, "day".to_string());
        assert!(res.is_ok());
    }
}
