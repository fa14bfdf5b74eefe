//! Mark-to-market engine: the periodic (60s) task that turns a ledger
//! snapshot plus live marks into a [`ntx_portfolio::PortfolioSnapshot`],
//! tracking the peak-equity watermark across ticks and resetting it at the
//! start of each trading day.

use std::collections::BTreeMap;
use std::sync::Mutex;

use ntx_portfolio::{build_snapshot, LedgerSnapshot, MarkMap, PortfolioSnapshot};

/// Per-day accumulator state the MTM engine carries across ticks.
/// `reset_for_day` clears the peak-equity watermark back to the day's
/// starting capital — a new day starts flat, it does not inherit
/// yesterday's high-water mark.
struct MtmDayState {
    day_id: u32,
    peak_equity_micros: i64,
}

pub struct MtmEngine {
    state: Mutex<MtmDayState>,
    margin_rate_bps: i64,
    /// strategy_id -> symbols it owns, used to compute per-strategy rollups.
    strategy_symbols: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MtmEngine {
    pub fn new(day_id: u32, initial_capital_micros: i64, margin_rate_bps: i64) -> Self {
        Self {
            state: Mutex::new(MtmDayState {
                day_id,
                peak_equity_micros: initial_capital_micros,
            }),
            margin_rate_bps,
            strategy_symbols: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register (or replace) the symbol set owned by a strategy, for the
    /// per-strategy rollup in the next snapshot.
    pub fn set_strategy_symbols(&self, strategy_id: impl Into<String>, symbols: Vec<String>) {
        self.strategy_symbols
            .lock()
            .expect("strategy symbols mutex poisoned")
            .insert(strategy_id.into(), symbols);
    }

    /// Daily reset: called once at session start for a new trading day.
    /// The peak-equity watermark resets to `capital_micros`; a day_id that
    /// hasn't changed is a no-op (idempotent against repeated calls).
    pub fn reset_for_day(&self, day_id: u32, capital_micros: i64) {
        let mut st = self.state.lock().expect("mtm day state mutex poisoned");
        if day_id != st.day_id {
            st.day_id = day_id;
            st.peak_equity_micros = capital_micros;
        }
    }

    /// Build a snapshot from the current ledger state and live marks,
    /// updating the peak-equity watermark in place.
    pub fn tick(&self, ledger: &LedgerSnapshot, marks: &MarkMap) -> PortfolioSnapshot {
        let mut st = self.state.lock().expect("mtm day state mutex poisoned");
        let strategy_symbols = self.strategy_symbols.lock().expect("strategy symbols mutex poisoned");

        let snapshot = build_snapshot(
            ledger.cash_micros,
            ledger.realized_pnl_micros,
            &ledger.positions,
            marks,
            self.margin_rate_bps,
            st.peak_equity_micros,
            &strategy_symbols,
        );

        st.peak_equity_micros = snapshot.peak_equity_micros;
        snapshot
    }
}
