//! Conflict resolver — blocks signals that would fight another open
//! position or duplicate a signal already accepted this bar.
//!
//! `evaluate` is a pure `(config, &mut state, signal) -> ConflictDecision`
//! function, the same shape `ntx-risk::engine::evaluate` uses: no I/O, no
//! clock, deterministic given its inputs. The caller (`ntx-runtime`) is
//! responsible for calling `clear_bar_signals` once per bar close and
//! `on_position_closed` whenever a position fully flattens.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    Buy,
    Sell,
}

/// Identifies a candidate trade for conflict checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub user_id: String,
    pub symbol: String,
    pub strategy_id: String,
    pub side: Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictConfig {
    /// Max number of distinct strategies allowed to hold a concurrent
    /// signal/position on the same symbol (across all users).
    pub max_strategies_per_symbol: u32,
}

impl ConflictConfig {
    pub fn sane_defaults() -> Self {
        Self {
            max_strategies_per_symbol: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Allowed,
    HedgeBlocked,
    SameStrategyReentryBlocked,
    FirstWinsThisBar,
    SymbolCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Allow,
    Reject(ReasonCode),
}

impl ConflictDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConflictDecision::Allow)
    }
}

type UserSymbolKey = (String, String);

/// Mutable state the conflict resolver needs across calls within a bar and
/// across bars. Owned by the caller (one instance per running engine).
#[derive(Debug, Clone, Default)]
pub struct ConflictState {
    /// Currently open position side, keyed by (user, symbol).
    open_positions: BTreeMap<UserSymbolKey, Side>,
    /// Strategy that already produced a signal for (user, symbol) this bar.
    bar_signals: BTreeMap<UserSymbolKey, String>,
    /// Distinct strategies currently holding an open position per symbol.
    symbol_strategy_counts: BTreeMap<String, BTreeMap<String, u32>>,
}

impl ConflictState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per bar close, before evaluating that bar's signals.
    pub fn clear_bar_signals(&mut self) {
        self.bar_signals.clear();
    }

    /// Call when a position fully flattens so the symbol cap and hedge
    /// check release their hold on (user, symbol, strategy_id).
    pub fn on_position_closed(&mut self, user_id: &str, symbol: &str, strategy_id: &str) {
        let key = (user_id.to_string(), symbol.to_string());
        self.open_positions.remove(&key);
        if let Some(counts) = self.symbol_strategy_counts.get_mut(symbol) {
            if let Some(c) = counts.get_mut(strategy_id) {
                *c = c.saturating_sub(1);
                if *c == 0 {
                    counts.remove(strategy_id);
                }
            }
            if counts.is_empty() {
                self.symbol_strategy_counts.remove(symbol);
            }
        }
    }

    /// Call when a signal is accepted and results in a new or maintained
    /// open position, so subsequent rules see it.
    fn record_accepted(&mut self, signal: &Signal) {
        let key = (signal.user_id.clone(), signal.symbol.clone());
        self.open_positions.insert(key.clone(), signal.side);
        self.bar_signals
            .insert(key, signal.strategy_id.clone());
        let counts = self
            .symbol_strategy_counts
            .entry(signal.symbol.clone())
            .or_default();
        *counts.entry(signal.strategy_id.clone()).or_insert(0) += 1;
    }
}

fn opposite(a: Side, b: Side) -> bool {
    a != b
}

/// Ordered conflict checks (spec.md §4.5):
/// 1. Hedge block — reject if an opposite-side position is already open
///    for this (user, symbol).
/// 2. Same-strategy re-entry block — reject if this exact strategy already
///    has an open position on this (user, symbol).
/// 3. First-wins-per-bar — reject if another strategy already produced a
///    signal for this (user, symbol) in the current bar.
/// 4. Per-symbol cap — reject if accepting this signal would exceed
///    `max_strategies_per_symbol` distinct strategies on the symbol.
pub fn evaluate(cfg: &ConflictConfig, st: &mut ConflictState, signal: &Signal) -> ConflictDecision {
    let key = (signal.user_id.clone(), signal.symbol.clone());

    if let Some(existing_side) = st.open_positions.get(&key) {
        if opposite(*existing_side, signal.side) {
            return ConflictDecision::Reject(ReasonCode::HedgeBlocked);
        }
    }

    let counts = st.symbol_strategy_counts.get(&signal.symbol);
    let strategy_already_open = counts
        .map(|c| c.get(&signal.strategy_id).copied().unwrap_or(0) > 0)
        .unwrap_or(false);
    if strategy_already_open {
        if let Some(existing_side) = st.open_positions.get(&key) {
            if *existing_side == signal.side {
                return ConflictDecision::Reject(ReasonCode::SameStrategyReentryBlocked);
            }
        }
    }

    if let Some(winner) = st.bar_signals.get(&key) {
        if winner != &signal.strategy_id {
            return ConflictDecision::Reject(ReasonCode::FirstWinsThisBar);
        }
    }

    let distinct_strategies = counts.map(|c| c.len() as u32).unwrap_or(0);
    let would_add_new_strategy = !counts
        .map(|c| c.contains_key(&signal.strategy_id))
        .unwrap_or(false);
    if would_add_new_strategy && distinct_strategies >= cfg.max_strategies_per_symbol {
        return ConflictDecision::Reject(ReasonCode::SymbolCapReached);
    }

    st.record_accepted(signal);
    ConflictDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(user: &str, symbol: &str, strategy: &str, side: Side) -> Signal {
        Signal {
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            strategy_id: strategy.to_string(),
            side,
        }
    }

    #[test]
    fn first_signal_for_symbol_is_allowed() {
        let cfg = ConflictConfig::sane_defaults();
        let mut st = ConflictState::new();
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        assert_eq!(d, ConflictDecision::Allow);
    }

    #[test]
    fn opposite_side_signal_is_hedge_blocked() {
        let cfg = ConflictConfig::sane_defaults();
        let mut st = ConflictState::new();
        evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s2", Side::Sell));
        assert_eq!(d, ConflictDecision::Reject(ReasonCode::HedgeBlocked));
    }

    #[test]
    fn second_strategy_same_bar_same_symbol_loses_to_first() {
        let cfg = ConflictConfig::sane_defaults();
        let mut st = ConflictState::new();
        evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s2", Side::Buy));
        assert_eq!(d, ConflictDecision::Reject(ReasonCode::FirstWinsThisBar));
    }

    #[test]
    fn next_bar_allows_a_second_strategy_up_to_cap() {
        let cfg = ConflictConfig::sane_defaults();
        let mut st = ConflictState::new();
        evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        st.clear_bar_signals();
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s2", Side::Buy));
        assert_eq!(d, ConflictDecision::Allow);
    }

    #[test]
    fn symbol_cap_blocks_once_exceeded() {
        let cfg = ConflictConfig {
            max_strategies_per_symbol: 1,
        };
        let mut st = ConflictState::new();
        evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        st.clear_bar_signals();
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s2", Side::Buy));
        assert_eq!(d, ConflictDecision::Reject(ReasonCode::SymbolCapReached));
    }

    #[test]
    fn closing_position_frees_the_symbol_cap() {
        let cfg = ConflictConfig {
            max_strategies_per_symbol: 1,
        };
        let mut st = ConflictState::new();
        evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        st.on_position_closed("u1", "RELIANCE", "s1");
        st.clear_bar_signals();
        let d = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s2", Side::Buy));
        assert_eq!(d, ConflictDecision::Allow);
    }

    #[test]
    fn same_strategy_same_direction_reentry_within_bar_is_first_wins_allowed() {
        let cfg = ConflictConfig::sane_defaults();
        let mut st = ConflictState::new();
        let d1 = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        assert_eq!(d1, ConflictDecision::Allow);
        st.clear_bar_signals();
        let d2 = evaluate(&cfg, &mut st, &sig("u1", "RELIANCE", "s1", Side::Buy));
        assert_eq!(d2, ConflictDecision::Reject(ReasonCode::SameStrategyReentryBlocked));
    }
}
