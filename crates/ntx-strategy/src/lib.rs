//! ntx-strategy
//!
//! Strategy Plugin Framework (Tier A)
//!
//! Contract (doc-aligned):
//! - Strategies output TARGET POSITIONS; core converts to orders.
//! - Strategy hook: on_bar -> StrategyOutput (target positions)
//! - Context provides bounded recent bars window; no DB/broker access.
//! - Shadow mode: strategy runs but cannot trade; emits SHADOW intents.
//! - Determinism required (event stream + config + seed). (Seed/stream wired later; host is deterministic.)

mod condition;
mod custom_strategy;
mod host;
mod ma_crossover;
mod plugin_registry;
mod types;

pub use condition::{Comparator, Indicator, Logic, Operand};
pub use custom_strategy::{CustomStrategy, CustomStrategyConfig};
pub use host::*;
pub use ma_crossover::{MaCrossoverConfig, MaCrossoverStrategy, MaKind};
pub use plugin_registry::{PluginRegistry, RegistryError, StrategyFactory, StrategyMeta};
pub use types::*;
