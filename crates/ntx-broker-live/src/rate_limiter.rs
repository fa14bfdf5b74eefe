//! Minimal request-pacing limiter for SmartAPI's per-second order cap.
//!
//! SmartAPI documents a per-second ceiling on order-placement calls; this
//! enforces a fixed minimum gap between calls rather than a sliding-window
//! counter, which is simpler and sufficient for the single-threaded-per-call
//! pacing `AngelOneAdapter` needs (every call site holds the limiter's mutex
//! for the duration of `acquire`, so callers are serialized anyway).

use std::thread;
use std::time::Duration;

/// Paces calls to at most `per_second` per second by sleeping out the
/// remainder of the minimum inter-call gap.
pub struct RateLimiter {
    min_gap_ms: i64,
    last_call_ms: Option<i64>,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            min_gap_ms: 1_000 / per_second as i64,
            last_call_ms: None,
        }
    }

    /// Blocks the calling thread, if needed, so that `now_ms` is at least
    /// `min_gap_ms` after the previous call. Updates internal state to
    /// `now_ms` plus whatever wait was applied.
    pub fn acquire(&mut self, now_ms: i64) {
        if let Some(last) = self.last_call_ms {
            let elapsed = now_ms - last;
            if elapsed < self.min_gap_ms {
                let wait_ms = (self.min_gap_ms - elapsed).max(0);
                thread::sleep(Duration::from_millis(wait_ms as u64));
                self.last_call_ms = Some(last + self.min_gap_ms);
                return;
            }
        }
        self.last_call_ms = Some(now_ms);
    }
}
