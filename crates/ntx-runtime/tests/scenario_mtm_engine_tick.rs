//! MTM engine scenarios: tick-driven unrealised PnL and the peak-equity /
//! drawdown watermark across ticks and a day rollover (spec.md §4.11).

use std::collections::BTreeMap;

use ntx_portfolio::{marks, LedgerSnapshot, Lot, PositionState};
use ntx_runtime::mtm::MtmEngine;

fn ledger_with_long(symbol: &str, qty: i64, entry_price_micros: i64, cash_micros: i64) -> LedgerSnapshot {
    let mut positions = BTreeMap::new();
    let mut pos = PositionState::new(symbol);
    pos.lots.push(Lot::long(qty, entry_price_micros));
    positions.insert(symbol.to_string(), pos);
    LedgerSnapshot {
        cash_micros,
        realized_pnl_micros: 0,
        positions,
        entry_count: 1,
        last_seq_no: 1,
    }
}

const M: i64 = 1_000_000;

#[test]
fn unrealised_gain_lifts_equity_and_peak() {
    let engine = MtmEngine::new(20260216, 100_000 * M, 2_000); // 20% margin rate
    let ledger = ledger_with_long("NIFTY", 10, 21_500 * M, 50_000 * M);

    let snap = engine.tick(&ledger, &marks([("NIFTY", 21_600 * M)]));

    assert_eq!(snap.unrealized_pnl_micros, (21_600 - 21_500) * 10 * M);
    assert_eq!(snap.peak_equity_micros, snap.equity_micros);
    assert_eq!(snap.drawdown_pct, 0.0);
}

#[test]
fn a_later_drawdown_is_measured_against_the_prior_peak() {
    let engine = MtmEngine::new(20260216, 100_000 * M, 2_000);
    let ledger = ledger_with_long("NIFTY", 10, 21_500 * M, 50_000 * M);

    // First tick: price rises, equity hits a new peak.
    let up = engine.tick(&ledger, &marks([("NIFTY", 21_700 * M)]));
    let peak = up.peak_equity_micros;

    // Second tick: price falls back below entry — equity drops below the
    // peak just recorded, producing a positive drawdown.
    let down = engine.tick(&ledger, &marks([("NIFTY", 21_400 * M)]));

    assert_eq!(down.peak_equity_micros, peak, "peak must not move down with equity");
    assert!(down.drawdown_pct > 0.0, "equity below the prior peak must show a positive drawdown");
    assert!(down.equity_micros < peak);
}

#[test]
fn reset_for_day_clears_the_peak_back_to_capital_on_a_new_day() {
    let engine = MtmEngine::new(20260216, 100_000 * M, 2_000);
    let ledger = ledger_with_long("NIFTY", 10, 21_500 * M, 50_000 * M);

    let up = engine.tick(&ledger, &marks([("NIFTY", 22_000 * M)]));
    assert!(up.peak_equity_micros > 100_000 * M);

    // Same day again: reset is a no-op.
    engine.reset_for_day(20260216, 100_000 * M);
    let still_up = engine.tick(&ledger, &marks([("NIFTY", 22_000 * M)]));
    assert_eq!(still_up.peak_equity_micros, up.peak_equity_micros);

    // New trading day: peak resets to the fresh day's starting capital.
    engine.reset_for_day(20260217, 100_000 * M);
    let flat_ledger = ledger_with_long("NIFTY", 10, 21_500 * M, 50_000 * M);
    let fresh = engine.tick(&flat_ledger, &marks([("NIFTY", 21_500 * M)]));
    assert_eq!(fresh.peak_equity_micros, fresh.equity_micros);
}
