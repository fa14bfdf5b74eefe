//! Seeded price simulation for the paper broker (spec.md §4.8):
//! a per-symbol random walk (±0.3% per tick), a synthetic rejection rate
//! (2–3% of submits), and side-aligned slippage (0.01%–0.05%) applied to
//! filled orders. Seeded with `StdRng::seed_from_u64` so scenario tests
//! stay fully reproducible.

use std::collections::BTreeMap;

use ntx_reconcile::Side;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WALK_BPS: i64 = 30; // ±0.30% per tick, expressed in basis points
const REJECTION_RATE_MIN: f64 = 0.02;
const REJECTION_RATE_MAX: f64 = 0.03;
const SLIPPAGE_BPS_MIN: i64 = 1; // 0.01%
const SLIPPAGE_BPS_MAX: i64 = 5; // 0.05%

pub struct PriceSimulator {
    rng: StdRng,
    last_price_micros: BTreeMap<String, i64>,
}

impl PriceSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            last_price_micros: BTreeMap::new(),
        }
    }

    /// Seed (or overwrite) the starting price for a symbol.
    pub fn seed_price(&mut self, symbol: impl Into<String>, price_micros: i64) {
        self.last_price_micros.insert(symbol.into(), price_micros);
    }

    pub fn last_price(&self, symbol: &str) -> Option<i64> {
        self.last_price_micros.get(symbol).copied()
    }

    /// Advance the symbol's price by one random-walk tick (±0.30%) and
    /// return the new price. Panics via `debug_assert` if the symbol was
    /// never seeded — callers must seed before walking.
    pub fn walk(&mut self, symbol: &str) -> i64 {
        let current = *self
            .last_price_micros
            .get(symbol)
            .unwrap_or_else(|| panic!("price for {symbol} was never seeded"));
        let bps = self.rng.gen_range(-WALK_BPS..=WALK_BPS);
        let next = apply_bps(current, bps);
        self.last_price_micros.insert(symbol.to_string(), next);
        next
    }

    /// `true` if this submit should be synthetically rejected.
    pub fn should_reject(&mut self) -> bool {
        let rate = self.rng.gen_range(REJECTION_RATE_MIN..REJECTION_RATE_MAX);
        self.rng.gen_bool(rate)
    }

    /// Fill price after slippage: buys fill worse (higher), sells fill
    /// worse (lower), by 0.01%-0.05% of the quoted price.
    pub fn slipped_fill_price(&mut self, quoted_price_micros: i64, side: Side) -> i64 {
        let bps = self.rng.gen_range(SLIPPAGE_BPS_MIN..=SLIPPAGE_BPS_MAX);
        match side {
            Side::Buy => apply_bps(quoted_price_micros, bps),
            Side::Sell => apply_bps(quoted_price_micros, -bps),
        }
    }
}

fn apply_bps(price_micros: i64, bps: i64) -> i64 {
    let delta = (price_micros as i128 * bps as i128) / 10_000;
    (price_micros as i128 + delta) as i64
}
