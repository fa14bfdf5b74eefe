//! Live market data source: a pluggable poll-based tick fetcher plus a
//! deterministic simulator for backtests and dry runs.
//!
//! A polling model (rather than a persistent websocket) is the deliberate
//! choice here — it keeps `LiveTickSource` a plain async function call with
//! no connection lifecycle to manage, at the cost of up to one poll
//! interval of latency. `PollingDriver` owns the cadence and forwards every
//! tick it receives onto an mpsc channel; the runtime's bar aggregator
//! worker is the consumer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::aggregator::Tick;

/// Anything that can be polled for the latest ticks since the previous call.
#[async_trait::async_trait]
pub trait LiveTickSource: Send {
    async fn poll_ticks(&mut self) -> Result<Vec<Tick>>;
}

/// Drives a [`LiveTickSource`] on a fixed interval, forwarding every tick it
/// returns onto `sender`. Stops when the source errors or the channel's
/// receiver is dropped.
pub struct PollingDriver<S: LiveTickSource> {
    source: S,
    interval: Duration,
}

impl<S: LiveTickSource> PollingDriver<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Runs until the source returns an error or the receiving end of
    /// `sender` is dropped. Returns the error that stopped it, if any.
    pub async fn run(mut self, sender: mpsc::Sender<Tick>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let ticks = self.source.poll_ticks().await?;
            for tick in ticks {
                if sender.send(tick).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

const WALK_BPS: i64 = 20; // +/-0.20% per simulated poll

/// Deterministic tick generator for paper/backtest sessions: a seeded random
/// walk per symbol, advancing a synthetic clock and cumulative-volume
/// counter by a fixed step on every poll so runs are fully reproducible.
pub struct SimulatedTickSource {
    rng: StdRng,
    symbols: Vec<String>,
    last_price_micros: BTreeMap<String, i64>,
    cumulative_volume: BTreeMap<String, i64>,
    now_ms: i64,
    step_ms: i64,
    volume_step_min: i64,
    volume_step_max: i64,
}

impl SimulatedTickSource {
    pub fn new(seed: u64, start_ms: i64, step_ms: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            symbols: Vec::new(),
            last_price_micros: BTreeMap::new(),
            cumulative_volume: BTreeMap::new(),
            now_ms: start_ms,
            step_ms,
            volume_step_min: 10,
            volume_step_max: 500,
        }
    }

    pub fn seed_symbol(&mut self, symbol: impl Into<String>, start_price_micros: i64) {
        let symbol = symbol.into();
        self.cumulative_volume.entry(symbol.clone()).or_insert(0);
        self.last_price_micros.insert(symbol.clone(), start_price_micros);
        if !self.symbols.contains(&symbol) {
            self.symbols.push(symbol);
        }
    }
}

#[async_trait::async_trait]
impl LiveTickSource for SimulatedTickSource {
    async fn poll_ticks(&mut self) -> Result<Vec<Tick>> {
        self.now_ms += self.step_ms;
        let mut out = Vec::with_capacity(self.symbols.len());

        for symbol in self.symbols.clone() {
            let current = *self.last_price_micros.get(&symbol).expect("seeded above");
            let bps = self.rng.gen_range(-WALK_BPS..=WALK_BPS);
            let delta = (current as i128 * bps as i128) / 10_000;
            let next_price = (current as i128 + delta) as i64;
            self.last_price_micros.insert(symbol.clone(), next_price);

            let vol_delta = self.rng.gen_range(self.volume_step_min..=self.volume_step_max);
            let cum = self.cumulative_volume.entry(symbol.clone()).or_insert(0);
            *cum += vol_delta;

            out.push(Tick {
                symbol,
                price_micros: next_price,
                cumulative_volume: *cum,
                ts_ms: self.now_ms,
            });
        }

        Ok(out)
    }
}

/// Injectable wall-clock source so live adapters never call `Utc::now()`
/// directly — tests and deterministic replay pass a fixed or stepped clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall-clock time.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to, for deterministic tests.
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
