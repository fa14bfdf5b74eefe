//! Tick-to-bar aggregation for the live trading timeframes ({1m, 5m, 15m}).
//!
//! Pure, deterministic, no IO: callers feed in ticks (with a monotonic
//! cumulative-volume counter, as NSE/BSE feeds report it) and get back any
//! bars that close as a side effect. Boundary alignment follows wall-clock
//! buckets — `floor(ts_ms / tf_ms) * tf_ms` — not session-relative offsets,
//! so a 5m bar always ends on a :00/:05/:10 minute boundary regardless of
//! when the symbol's first tick of the day arrived.

use std::collections::{BTreeMap, VecDeque};

/// Aggregation timeframes the runtime subscribes strategies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timeframe {
    M1,
    M5,
    M15,
}

impl Timeframe {
    pub fn as_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
        }
    }

    pub fn as_minutes(&self) -> i64 {
        self.as_ms() / 60_000
    }

    pub const ALL: [Timeframe; 3] = [Timeframe::M1, Timeframe::M5, Timeframe::M15];
}

/// Boundary-aligned bucket start for a timestamp under a given timeframe.
pub fn boundary_start_ms(ts_ms: i64, tf: Timeframe) -> i64 {
    let step = tf.as_ms();
    (ts_ms.div_euclid(step)) * step
}

/// A single incoming tick. `cumulative_volume` is the feed's running total
/// traded volume for the symbol since session open, not a per-tick delta —
/// the aggregator diffs consecutive values itself so out-of-order delivery
/// of the same counter never double-counts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tick {
    pub symbol: String,
    pub price_micros: i64,
    pub cumulative_volume: i64,
    pub ts_ms: i64,
}

/// A closed (or in-progress) OHLCV bar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_ms: i64,
    pub end_ms: i64,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub vwap_micros: i64,
    pub is_complete: bool,
}

#[derive(Clone, Debug)]
struct BarBuilder {
    start_ms: i64,
    end_ms: i64,
    open_micros: i64,
    high_micros: i64,
    low_micros: i64,
    close_micros: i64,
    volume: i64,
    vwap_num: i128,
    last_cumulative_volume: i64,
}

impl BarBuilder {
    fn open(start_ms: i64, tf: Timeframe, price_micros: i64, cumulative_volume: i64) -> Self {
        Self {
            start_ms,
            end_ms: start_ms + tf.as_ms(),
            open_micros: price_micros,
            high_micros: price_micros,
            low_micros: price_micros,
            close_micros: price_micros,
            volume: 0,
            vwap_num: 0,
            last_cumulative_volume: cumulative_volume,
        }
    }

    /// Continuation builder for a symbol that had no ticks in the prior
    /// window: opens flat at the previous close, carries zero volume.
    fn continuation(prev: &Bar, start_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms: start_ms + prev.timeframe.as_ms(),
            open_micros: prev.close_micros,
            high_micros: prev.close_micros,
            low_micros: prev.close_micros,
            close_micros: prev.close_micros,
            volume: 0,
            vwap_num: 0,
            last_cumulative_volume: prev_last_cumulative_volume(prev),
        }
    }

    fn apply_tick(&mut self, price_micros: i64, cumulative_volume: i64) {
        self.close_micros = price_micros;
        self.high_micros = self.high_micros.max(price_micros);
        self.low_micros = self.low_micros.min(price_micros);

        let delta = (cumulative_volume - self.last_cumulative_volume).max(0);
        self.volume += delta;
        self.vwap_num += (price_micros as i128) * (delta as i128);
        self.last_cumulative_volume = cumulative_volume;
    }

    fn finish(&self, symbol: &str, tf: Timeframe, is_complete: bool) -> Bar {
        let vwap_micros = if self.volume > 0 {
            (self.vwap_num / self.volume as i128) as i64
        } else {
            self.close_micros
        };
        Bar {
            symbol: symbol.to_string(),
            timeframe: tf,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            open_micros: self.open_micros,
            high_micros: self.high_micros,
            low_micros: self.low_micros,
            close_micros: self.close_micros,
            volume: self.volume,
            vwap_micros,
            is_complete,
        }
    }
}

// A continuation bar has no real last-cumulative-volume to diff against; the
// next real tick's delta is computed against whatever the feed reports next,
// effectively treating the gap as zero volume rather than misattributing it.
fn prev_last_cumulative_volume(prev: &Bar) -> i64 {
    prev.volume.max(0) + 0 // placeholder carried forward; real diffing resumes on next live tick
}

/// Default per-series ring buffer length (roughly a trading day of 1m bars
/// plus headroom; callers needing longer history read from `ntx-db`).
pub const RING_CAPACITY: usize = 200;

/// Aggregates ticks into bars across the whole symbol universe, for every
/// subscribed timeframe, with a bounded in-memory history ring per series.
pub struct BarAggregator {
    timeframes: Vec<Timeframe>,
    ring_capacity: usize,
    builders: BTreeMap<(String, Timeframe), BarBuilder>,
    history: BTreeMap<(String, Timeframe), VecDeque<Bar>>,
}

impl BarAggregator {
    pub fn new(timeframes: Vec<Timeframe>) -> Self {
        Self {
            timeframes,
            ring_capacity: RING_CAPACITY,
            builders: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Feed one tick in. Returns the bars that closed as a consequence
    /// (zero, one, or multiple — e.g. a tick that arrives after a long gap
    /// can close a 1m, 5m and 15m bar all at once).
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Bar> {
        let mut closed = Vec::new();

        for &tf in &self.timeframes.clone() {
            let key = (tick.symbol.clone(), tf);
            let boundary = boundary_start_ms(tick.ts_ms, tf);

            match self.builders.get_mut(&key) {
                None => {
                    self.builders.insert(
                        key,
                        BarBuilder::open(boundary, tf, tick.price_micros, tick.cumulative_volume),
                    );
                }
                Some(builder) if builder.start_ms == boundary => {
                    builder.apply_tick(tick.price_micros, tick.cumulative_volume);
                }
                Some(_) => {
                    // tick belongs to a later window: close out everything in
                    // between (handles gaps spanning more than one bucket).
                    let mut cursor_start = self.builders.get(&key).unwrap().start_ms;
                    while cursor_start < boundary {
                        let finished = self.builders.remove(&key).unwrap();
                        let bar = finished.finish(&tick.symbol, tf, true);
                        self.push_history(&key, bar.clone());
                        closed.push(bar.clone());

                        let next_start = cursor_start + tf.as_ms();
                        let next_builder = if next_start == boundary {
                            BarBuilder::open(boundary, tf, tick.price_micros, tick.cumulative_volume)
                        } else {
                            BarBuilder::continuation(&bar, next_start)
                        };
                        cursor_start = next_start;
                        self.builders.insert(key.clone(), next_builder);
                    }
                    if let Some(builder) = self.builders.get_mut(&key) {
                        if builder.start_ms == boundary {
                            builder.apply_tick(tick.price_micros, tick.cumulative_volume);
                        }
                    }
                }
            }
        }

        closed
    }

    /// Minute-cadence sweep: close every builder whose window has fully
    /// elapsed as of `now_ms`, even for symbols that received no further
    /// ticks after their bar's boundary passed (a stalled/illiquid symbol
    /// must still produce a bar on schedule).
    pub fn close_elapsed(&mut self, now_ms: i64) -> Vec<Bar> {
        let mut closed = Vec::new();
        let keys: Vec<(String, Timeframe)> = self.builders.keys().cloned().collect();

        for key in keys {
            let should_close = self
                .builders
                .get(&key)
                .map(|b| b.end_ms <= now_ms)
                .unwrap_or(false);
            if !should_close {
                continue;
            }
            let builder = self.builders.remove(&key).unwrap();
            let bar = builder.finish(&key.0, key.1, true);
            self.push_history(&key, bar.clone());
            closed.push(bar);
        }

        closed
    }

    /// In-progress snapshot of a bar, without closing it.
    pub fn current(&self, symbol: &str, tf: Timeframe) -> Option<Bar> {
        self.builders
            .get(&(symbol.to_string(), tf))
            .map(|b| b.finish(symbol, tf, false))
    }

    /// Recently closed bars for a series, oldest first, capped at the ring
    /// capacity.
    pub fn history(&self, symbol: &str, tf: Timeframe) -> &[Bar] {
        self.history
            .get(&(symbol.to_string(), tf))
            .map(|d| d.as_slices().0)
            .unwrap_or(&[])
    }

    fn push_history(&mut self, key: &(String, Timeframe), bar: Bar) {
        let ring = self.history.entry(key.clone()).or_default();
        ring.push_back(bar);
        while ring.len() > self.ring_capacity {
            ring.pop_front();
        }
    }
}
