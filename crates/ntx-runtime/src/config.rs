//! Engine configuration: cadences, risk limits, and broker credentials.
//!
//! Loaded from `ntx-config`'s layered YAML + `ResolvedSecrets`. Every field
//! here has a `sane_defaults()`-style fallback so a dev box with a minimal
//! `base.yaml` can still boot in PAPER mode.

use ntx_config::secrets::ResolvedSecrets;
use ntx_risk::{RiskConfig, TradeGateConfig};
use serde_json::Value;

/// Which broker sits behind the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerMode {
    Paper,
    Live,
}

impl BrokerMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIVE" => BrokerMode::Live,
            _ => BrokerMode::Paper,
        }
    }

    pub fn bypasses_market_hours_gate(&self) -> bool {
        matches!(self, BrokerMode::Paper)
    }
}

/// Angel One (SmartAPI) credentials, resolved from the environment.
///
/// Kept separate from [`ResolvedSecrets`] (which only models the generic
/// broker_api_key/secret pair `ntx-config` already exposes) because SmartAPI
/// needs a client code, a PIN, and a TOTP seed on top of an API key.
#[derive(Clone)]
pub struct AngelCredentials {
    pub api_key: String,
    pub client_code: String,
    pub client_pin: String,
    pub totp_secret: String,
}

impl std::fmt::Debug for AngelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AngelCredentials")
            .field("api_key", &"<REDACTED>")
            .field("client_code", &"<REDACTED>")
            .field("client_pin", &"<REDACTED>")
            .field("totp_secret", &"<REDACTED>")
            .finish()
    }
}

impl AngelCredentials {
    /// Resolve from well-known env vars. Returns `None` if any are missing —
    /// callers in PAPER mode never need this.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANGEL_API_KEY").ok().filter(|s| !s.trim().is_empty())?;
        let client_code = std::env::var("ANGEL_CLIENT_ID").ok().filter(|s| !s.trim().is_empty())?;
        let client_pin = std::env::var("ANGEL_MPIN")
            .or_else(|_| std::env::var("ANGEL_PASSWORD"))
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        let totp_secret = std::env::var("ANGEL_TOTP_SECRET").ok().filter(|s| !s.trim().is_empty())?;
        Some(Self {
            api_key,
            client_code,
            client_pin,
            totp_secret,
        })
    }
}

/// Cadences for the engine's background tasks, all in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadences {
    pub reconcile_full_scan_ms: i64,
    pub reconcile_retry_tick_ms: i64,
    pub mtm_ms: i64,
    pub bar_close_sweep_ms: i64,
    pub reconcile_freshness_bound_ms: i64,
}

impl Cadences {
    pub fn sane_defaults() -> Self {
        Self {
            reconcile_full_scan_ms: 30_000,
            reconcile_retry_tick_ms: 5_000,
            mtm_ms: 60_000,
            bar_close_sweep_ms: 1_000,
            reconcile_freshness_bound_ms: 45_000,
        }
    }
}

/// Account-level risk limits, read from config keys under `/risk`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiskLimits {
    pub max_daily_loss_micros: i64,
    pub max_trade_size: i64,
    pub max_open_positions: u32,
    pub max_risk_per_trade_micros: i64,
    pub max_trades_per_day: u32,
    pub consecutive_loss_limit: u32,
    pub live_safe_mode: bool,
    pub margin_rate_bps: i64,
}

impl RiskLimits {
    pub fn sane_defaults() -> Self {
        Self {
            max_daily_loss_micros: 0,
            max_trade_size: 0,
            max_open_positions: 5,
            max_risk_per_trade_micros: 5_000 * 1_000_000,
            max_trades_per_day: 20,
            consecutive_loss_limit: 3,
            live_safe_mode: true,
            margin_rate_bps: 2_000,
        }
    }

    /// Read overrides from a loaded config JSON tree (`/risk/...` pointers).
    /// Missing or malformed keys silently fall back to the existing value.
    pub fn apply_overrides(mut self, config_json: &Value) -> Self {
        let i64_at = |ptr: &str| config_json.pointer(ptr).and_then(|v| v.as_i64());
        let u64_at = |ptr: &str| config_json.pointer(ptr).and_then(|v| v.as_u64());
        let bool_at = |ptr: &str| config_json.pointer(ptr).and_then(|v| v.as_bool());

        if let Some(v) = i64_at("/risk/max_daily_loss_micros") {
            self.max_daily_loss_micros = v;
        }
        if let Some(v) = i64_at("/risk/max_trade_size") {
            self.max_trade_size = v;
        }
        if let Some(v) = u64_at("/risk/max_open_positions") {
            self.max_open_positions = v as u32;
        }
        if let Some(v) = i64_at("/risk/max_risk_per_trade_micros") {
            self.max_risk_per_trade_micros = v;
        }
        if let Some(v) = u64_at("/risk/max_trades_per_day") {
            self.max_trades_per_day = v as u32;
        }
        if let Some(v) = u64_at("/risk/consecutive_loss_limit") {
            self.consecutive_loss_limit = v as u32;
        }
        if let Some(v) = bool_at("/risk/live_safe_mode") {
            self.live_safe_mode = v;
        }
        self
    }

    /// Project into the equity-based kill-switch engine's config shape.
    /// `max_drawdown_limit_micros` has no direct `RiskLimits` field — it's
    /// derived as the daily loss limit, since this repo does not carry a
    /// separate peak-drawdown cap distinct from the daily loss budget.
    pub fn to_risk_config(&self) -> RiskConfig {
        RiskConfig {
            daily_loss_limit_micros: self.max_daily_loss_micros,
            max_drawdown_limit_micros: self.max_daily_loss_micros,
            reject_storm_max_rejects_in_window: 10,
            pdt_auto_enabled: false,
            missing_protective_stop_flattens: true,
        }
    }

    /// Project into the per-order trade gate's config shape.
    pub fn to_trade_gate_config(&self) -> TradeGateConfig {
        TradeGateConfig {
            consecutive_loss_limit: self.consecutive_loss_limit,
            max_risk_per_trade_micros: self.max_risk_per_trade_micros,
            max_open_positions: self.max_open_positions,
            max_trades_per_day: self.max_trades_per_day,
            require_stop_loss: self.live_safe_mode,
            min_available_margin_bps: 2_000,
        }
    }
}

/// Top-level engine configuration, assembled once at startup and shared
/// (read-only) by every task the engine spawns.
#[derive(Clone)]
pub struct EngineConfig {
    pub mode: BrokerMode,
    pub cadences: Cadences,
    pub risk_limits: RiskLimits,
    pub secrets: ResolvedSecrets,
    pub angel: Option<AngelCredentials>,
    pub initial_capital_micros: i64,
}

impl EngineConfig {
    pub fn new(
        mode: BrokerMode,
        config_json: &Value,
        secrets: ResolvedSecrets,
        initial_capital_micros: i64,
    ) -> Self {
        let angel = match mode {
            BrokerMode::Live => AngelCredentials::from_env(),
            BrokerMode::Paper => None,
        };
        Self {
            mode,
            cadences: Cadences::sane_defaults(),
            risk_limits: RiskLimits::sane_defaults().apply_overrides(config_json),
            secrets,
            angel,
            initial_capital_micros,
        }
    }
}
