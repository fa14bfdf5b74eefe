//! Order Router: the thin, crate-private boundary between `BrokerGateway`
//! and a broker adapter.
//!
//! `OrderRouter` is `pub(crate)` — it is never re-exported from `lib.rs` —
//! so the only way external code reaches a [`crate::gateway::BrokerAdapter`]
//! is through `BrokerGateway`, which manufactures the `BrokerInvokeToken`
//! every adapter call requires. The router itself does no gate evaluation;
//! that is `BrokerGateway`'s job. It stays thin and deterministic so it
//! never embeds strategy, risk, or accounting logic.

use crate::gateway::{
    BrokerAdapter, BrokerCancelResponse, BrokerInvokeToken, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

pub(crate) struct OrderRouter<B: BrokerAdapter> {
    broker: B,
}

impl<B: BrokerAdapter> OrderRouter<B> {
    pub(crate) fn new(broker: B) -> Self {
        Self { broker }
    }

    pub(crate) fn route_submit(
        &self,
        req: BrokerSubmitRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse> {
        self.broker.submit_order(req, token)
    }

    pub(crate) fn route_cancel(
        &self,
        broker_order_id: &str,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse> {
        self.broker.cancel_order(broker_order_id, token)
    }

    pub(crate) fn route_replace(
        &self,
        req: BrokerReplaceRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse> {
        self.broker.replace_order(req, token)
    }
}
