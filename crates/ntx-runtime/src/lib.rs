//! ntx-runtime
//!
//! The Execution Engine coordinator: the only crate in the workspace that
//! spawns long-lived tasks. Every other crate (`ntx-risk`, `ntx-conflict`,
//! `ntx-execution`, `ntx-reconcile`, `ntx-portfolio`, `ntx-integrity`, ...)
//! is pure deterministic logic with no IO and no clock of its own; this
//! crate is the async boundary that feeds them real ticks, real bars, and
//! a real clock, and wires their decisions into broker calls.
//!
//! Cross-component signaling is explicit `tokio::sync::{mpsc, broadcast}`
//! channels constructed in [`engine::ExecutionEngine::new`] — no
//! process-global statics anywhere in this crate.

pub mod broker_adapter;
pub mod config;
pub mod engine;
pub mod executor;
pub mod gates;
pub mod mtm;
pub mod pipeline;
pub mod reconciler;

pub use broker_adapter::{FailoverBroker, PaperBrokerAdapter};
pub use config::EngineConfig;
pub use engine::{EngineHandle, EngineStatus, ExecutionEngine};
pub use executor::OrderExecutor;
pub use gates::{IntegrityGateImpl, ReconcileGateImpl, RiskGateImpl, RiskRuntimeState};
pub use pipeline::{BarPipeline, PipelineOutcome};
