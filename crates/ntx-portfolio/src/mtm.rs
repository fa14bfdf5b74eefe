//! Mark-to-market accounting: per-position SL/TP distance, margin usage,
//! drawdown tracking, and per-strategy equity rollup.
//!
//! Pure deterministic logic (no IO, no wall-clock) — same discipline as the
//! rest of this crate. Callers supply marks, margin rates and peak-equity
//! watermarks; nothing here reaches out to a broker or clock.

use std::collections::BTreeMap;

use crate::types::PositionState;
use crate::MarkMap;

fn i128_to_i64_clamp(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}

/// Distance from the current mark to a stop-loss level, in micros.
/// Positive means the mark has not yet reached the stop; zero or negative
/// means the stop would trigger at this mark.
///
/// For a long position the stop sits below the mark: `distance = mark - sl`.
/// For a short position the stop sits above the mark: `distance = sl - mark`.
/// Flat positions (qty_signed == 0) always return `None`.
pub fn distance_to_sl(pos: &PositionState, mark_micros: i64, sl_micros: i64) -> Option<i64> {
    let qty = pos.qty_signed();
    if qty > 0 {
        Some(mark_micros - sl_micros)
    } else if qty < 0 {
        Some(sl_micros - mark_micros)
    } else {
        None
    }
}

/// Distance from the current mark to a take-profit level, in micros.
/// Positive means the target has not yet been reached.
///
/// For a long position the target sits above the mark: `distance = tp - mark`.
/// For a short position the target sits below the mark: `distance = mark - tp`.
pub fn distance_to_tp(pos: &PositionState, mark_micros: i64, tp_micros: i64) -> Option<i64> {
    let qty = pos.qty_signed();
    if qty > 0 {
        Some(tp_micros - mark_micros)
    } else if qty < 0 {
        Some(mark_micros - tp_micros)
    } else {
        None
    }
}

/// Used margin across all positions: Σ |qty| * mark * margin_rate.
/// `margin_rate_bps` is expressed in basis points of notional (e.g. 2000 = 20%
/// for NSE intraday equity MIS leverage).
pub fn used_margin_micros(
    positions: &BTreeMap<String, PositionState>,
    marks: &MarkMap,
    margin_rate_bps: i64,
) -> i64 {
    let mut total: i128 = 0;
    for (sym, pos) in positions {
        let mark = *marks.get(sym).unwrap_or(&0);
        let qty = pos.qty_signed().abs();
        let notional = (qty as i128) * (mark as i128);
        total += notional * (margin_rate_bps as i128) / 10_000;
    }
    i128_to_i64_clamp(total)
}

/// Margin still available before the account is fully utilized.
/// Clamped at zero — never reports negative headroom even if `used_margin`
/// exceeds `equity` (that is a margin-call condition the risk engine handles).
pub fn available_margin_micros(equity_micros: i64, used_margin_micros: i64) -> i64 {
    (equity_micros - used_margin_micros).max(0)
}

/// Running peak-equity watermark. Callers persist the returned value and
/// feed it back in as `prior_peak_micros` on the next call.
pub fn peak_equity_micros(prior_peak_micros: i64, equity_micros: i64) -> i64 {
    prior_peak_micros.max(equity_micros)
}

/// Drawdown from peak equity, as a percentage (0.0 .. 100.0+) of the peak.
/// Returns 0.0 when `peak_micros <= 0` (no meaningful peak yet) or when
/// equity is at or above the peak.
pub fn drawdown_pct(equity_micros: i64, peak_micros: i64) -> f64 {
    if peak_micros <= 0 || equity_micros >= peak_micros {
        return 0.0;
    }
    let drop = (peak_micros - equity_micros) as f64;
    (drop / peak_micros as f64) * 100.0
}

/// Equity + exposure rollup scoped to a single strategy's symbol set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyRollup {
    pub strategy_id: String,
    pub equity_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub gross_exposure_micros: i64,
}

/// Aggregate a whole-portfolio mark into per-strategy rollups.
///
/// `strategy_symbols` maps strategy_id -> the symbols it owns. A symbol
/// absent from every strategy's set (e.g. a manual/legacy position) is
/// skipped — its contribution shows up only in the whole-portfolio metrics
/// in [`crate::metrics`].
pub fn rollup_by_strategy(
    positions: &BTreeMap<String, PositionState>,
    marks: &MarkMap,
    strategy_symbols: &BTreeMap<String, Vec<String>>,
) -> Vec<StrategyRollup> {
    let mut out = Vec::with_capacity(strategy_symbols.len());

    for (strategy_id, symbols) in strategy_symbols {
        let mut equity: i128 = 0;
        let mut unrealized: i128 = 0;
        let mut gross: i128 = 0;

        for sym in symbols {
            let Some(pos) = positions.get(sym) else {
                continue;
            };
            let mark = *marks.get(sym).unwrap_or(&0);
            let qty = pos.qty_signed();
            equity += (qty as i128) * (mark as i128);
            gross += (qty.abs() as i128) * (mark as i128);

            for lot in &pos.lots {
                let entry = lot.entry_price_micros;
                let q = lot.qty_signed;
                if q > 0 {
                    unrealized += (mark as i128 - entry as i128) * (q as i128);
                } else if q < 0 {
                    unrealized += (entry as i128 - mark as i128) * ((-q) as i128);
                }
            }
        }

        out.push(StrategyRollup {
            strategy_id: strategy_id.clone(),
            equity_micros: i128_to_i64_clamp(equity),
            unrealized_pnl_micros: i128_to_i64_clamp(unrealized),
            gross_exposure_micros: i128_to_i64_clamp(gross),
        });
    }

    out
}

/// Full mark-to-market snapshot of the portfolio at a point in time.
/// This is the shape persisted/reported by the runtime's periodic MTM tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub equity_micros: i64,
    pub cash_micros: i64,
    pub realized_pnl_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub gross_exposure_micros: i64,
    pub net_exposure_micros: i64,
    pub used_margin_micros: i64,
    pub available_margin_micros: i64,
    pub peak_equity_micros: i64,
    pub drawdown_pct: f64,
    pub per_strategy: Vec<StrategyRollup>,
}

/// Build a full snapshot from portfolio state, marks, margin rate, the prior
/// peak-equity watermark and a strategy->symbols map.
pub fn build_snapshot(
    cash_micros: i64,
    realized_pnl_micros: i64,
    positions: &BTreeMap<String, PositionState>,
    marks: &MarkMap,
    margin_rate_bps: i64,
    prior_peak_micros: i64,
    strategy_symbols: &BTreeMap<String, Vec<String>>,
) -> PortfolioSnapshot {
    let exposure = crate::metrics::compute_exposure_micros(positions, marks);
    let unrealized = crate::metrics::compute_unrealized_pnl_micros(positions, marks);
    let equity = crate::metrics::compute_equity_micros(cash_micros, positions, marks);
    let used_margin = used_margin_micros(positions, marks, margin_rate_bps);
    let available_margin = available_margin_micros(equity, used_margin);
    let peak = peak_equity_micros(prior_peak_micros, equity);
    let dd = drawdown_pct(equity, peak);
    let per_strategy = rollup_by_strategy(positions, marks, strategy_symbols);

    PortfolioSnapshot {
        equity_micros: equity,
        cash_micros,
        realized_pnl_micros,
        unrealized_pnl_micros: unrealized,
        gross_exposure_micros: exposure.gross_exposure_micros,
        net_exposure_micros: exposure.net_exposure_micros,
        used_margin_micros: used_margin,
        available_margin_micros: available_margin,
        peak_equity_micros: peak,
        drawdown_pct: dd,
        per_strategy,
    }
}
