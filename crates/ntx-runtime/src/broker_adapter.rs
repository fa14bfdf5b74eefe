//! Concrete [`BrokerAdapter`] wiring: a paper-trading wrapper around
//! `ntx-broker-paper`'s bespoke `&mut self` API, and a failover wrapper
//! that routes primary/fallback calls through a [`CircuitBreaker`].
//!
//! `ntx-broker-live::AngelOneAdapter` already implements `BrokerAdapter`
//! directly (it uses `tokio::task::block_in_place` internally), so it
//! needs no wrapper here — only the paper broker and the failover
//! combinator do.

use std::error::Error;
use std::sync::Mutex;

use ntx_broker_paper::types::{CancelRequest, ReplaceRequest, SubmitOrder};
use ntx_broker_paper::{PaperBroker, PriceSimulator};
use ntx_circuit::{CallOutcome, CircuitBreaker, CircuitConfig};
use ntx_execution::{
    BrokerAdapter, BrokerCancelResponse, BrokerInvokeToken, BrokerReplaceRequest, BrokerReplaceResponse,
    BrokerSubmitRequest, BrokerSubmitResponse,
};
use ntx_reconcile::Side as ReconcileSide;

/// A fallback price used the first time a symbol is submitted without a
/// limit price to seed — the paper simulator panics on an unseeded walk.
/// Real price discovery happens through the market data feed, not here;
/// this only keeps the simulator from panicking on the very first order
/// for a symbol it hasn't seen a bar for yet.
const FALLBACK_SEED_PRICE_MICROS: i64 = 100 * 1_000_000;

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Adapts [`PaperBroker`] + [`PriceSimulator`] to [`BrokerAdapter`].
///
/// `quantity` on [`BrokerSubmitRequest`] carries direction by sign (positive
/// = buy, negative = sell) since the adapter contract has no separate side
/// field — the same convention `ntx-broker-live::AngelOneAdapter` uses.
pub struct PaperBrokerAdapter {
    broker: Mutex<PaperBroker>,
    sim: Mutex<PriceSimulator>,
}

impl PaperBrokerAdapter {
    pub fn new(seed: u64) -> Self {
        Self {
            broker: Mutex::new(PaperBroker::new()),
            sim: Mutex::new(PriceSimulator::new(seed)),
        }
    }

    /// Snapshot accessors for the reconciler / MTM tasks, which need to see
    /// the paper broker's view of orders and positions without going
    /// through the `BrokerAdapter` trait (which has no snapshot method).
    pub fn snapshot(&self) -> (ntx_broker_paper::types::BrokerMessageId, ntx_reconcile::BrokerSnapshot) {
        self.broker.lock().expect("paper broker mutex poisoned").snapshot()
    }

    fn side_and_qty(quantity: i32) -> (ReconcileSide, i64) {
        if quantity >= 0 {
            (ReconcileSide::Buy, quantity as i64)
        } else {
            (ReconcileSide::Sell, (-(quantity as i64)).max(0))
        }
    }
}

impl BrokerAdapter for PaperBrokerAdapter {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse, Box<dyn Error>> {
        let (side, qty) = Self::side_and_qty(req.quantity);

        {
            let mut sim = self.sim.lock().expect("price simulator mutex poisoned");
            if sim.last_price(&req.symbol).is_none() {
                sim.seed_price(&req.symbol, req.limit_price.unwrap_or(FALLBACK_SEED_PRICE_MICROS));
            }
        }

        let submit = SubmitOrder {
            client_order_id: req.order_id,
            symbol: req.symbol,
            side,
            qty,
        };

        let mut broker = self.broker.lock().expect("paper broker mutex poisoned");
        let mut sim = self.sim.lock().expect("price simulator mutex poisoned");
        let resp = broker.submit_simulated(submit, &mut sim);

        let status = match resp.outcome {
            ntx_broker_paper::SimulatedSubmitOutcome::Rejected => "REJECTED",
            ntx_broker_paper::SimulatedSubmitOutcome::Filled { .. } => "FILLED",
        };

        Ok(BrokerSubmitResponse {
            broker_order_id: resp.broker_order_id,
            submitted_at: now_ms(),
            status: status.to_string(),
        })
    }

    fn cancel_order(
        &self,
        order_id: &str,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse, Box<dyn Error>> {
        let mut broker = self.broker.lock().expect("paper broker mutex poisoned");
        broker.cancel(CancelRequest {
            client_order_id: order_id.to_string(),
        });
        Ok(BrokerCancelResponse {
            broker_order_id: order_id.to_string(),
            cancelled_at: now_ms(),
            status: "CANCELED".to_string(),
        })
    }

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse, Box<dyn Error>> {
        let mut broker = self.broker.lock().expect("paper broker mutex poisoned");
        broker.replace(ReplaceRequest {
            client_order_id: req.broker_order_id.clone(),
            new_qty: req.quantity as i64,
        });
        Ok(BrokerReplaceResponse {
            broker_order_id: req.broker_order_id,
            replaced_at: now_ms(),
            status: "REPLACED".to_string(),
        })
    }
}

/// Routes `BrokerAdapter` calls through a [`CircuitBreaker`]: while the
/// breaker is CLOSED or probing HALF_OPEN, calls go to `primary`; while OPEN
/// (or HALF_OPEN with a probe already in flight), calls go to `fallback`
/// instead, and the primary is never touched. The clock is injected so
/// scenario tests can drive deterministic time.
pub struct FailoverBroker<P, F, C>
where
    P: BrokerAdapter,
    F: BrokerAdapter,
    C: Fn() -> i64,
{
    primary: P,
    fallback: F,
    breaker: Mutex<CircuitBreaker>,
    clock: C,
}

impl<P, F, C> FailoverBroker<P, F, C>
where
    P: BrokerAdapter,
    F: BrokerAdapter,
    C: Fn() -> i64,
{
    pub fn new(primary: P, fallback: F, clock: C) -> Self {
        Self {
            primary,
            fallback,
            breaker: Mutex::new(CircuitBreaker::new(CircuitConfig::sane_defaults())),
            clock,
        }
    }

    pub fn circuit_state(&self) -> ntx_circuit::CircuitState {
        self.breaker.lock().expect("circuit breaker mutex poisoned").state()
    }

    /// Run `call` against the primary if permitted, recording the outcome
    /// on the breaker; otherwise run `fallback_call` against the fallback
    /// without touching the breaker's failure/success counters.
    fn dispatch<T>(
        &self,
        call: impl FnOnce(&P) -> Result<T, Box<dyn Error>>,
        fallback_call: impl FnOnce(&F) -> Result<T, Box<dyn Error>>,
    ) -> Result<T, Box<dyn Error>> {
        let now = (self.clock)();
        let permission = self.breaker.lock().expect("circuit breaker mutex poisoned").before_call(now);

        match permission {
            ntx_circuit::CallPermission::Allow | ntx_circuit::CallPermission::AllowProbe => {
                let result = call(&self.primary);
                let outcome = match &result {
                    Ok(_) => CallOutcome::Success,
                    Err(_) => CallOutcome::Failure,
                };
                self.breaker.lock().expect("circuit breaker mutex poisoned").on_result(now, outcome);
                result
            }
            ntx_circuit::CallPermission::DenyRouteToFallback => fallback_call(&self.fallback),
        }
    }
}

impl<P, F, C> BrokerAdapter for FailoverBroker<P, F, C>
where
    P: BrokerAdapter,
    F: BrokerAdapter,
    C: Fn() -> i64,
{
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse, Box<dyn Error>> {
        let req_fallback = req.clone();
        self.dispatch(
            |p| p.submit_order(req, token),
            |f| f.submit_order(req_fallback, token),
        )
    }

    fn cancel_order(
        &self,
        order_id: &str,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse, Box<dyn Error>> {
        self.dispatch(
            |p| p.cancel_order(order_id, token),
            |f| f.cancel_order(order_id, token),
        )
    }

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse, Box<dyn Error>> {
        let req_fallback = req.clone();
        self.dispatch(
            |p| p.replace_order(req, token),
            |f| f.replace_order(req_fallback, token),
        )
    }
}
