//! Exponential-backoff retry for transient SmartAPI failures.
//!
//! 3 attempts, base delay 1s, factor 2 (1s, 2s, 4s...), +/-30% jitter so a
//! burst of concurrently-failing calls doesn't retry in lockstep. Errors
//! whose message names a rejection SmartAPI will repeat forever (insufficient
//! funds, invalid order, outright rejection) are not retried — they fail
//! fast so the caller's outbox/reconcile layer can react instead of burning
//! the retry budget on something that'll never succeed.

use std::error::Error;
use std::thread;
use std::time::Duration;

use rand::Rng;

#[derive(Clone, Debug)]
pub struct BackoffSchedule {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub jitter_frac: f64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            jitter_frac: 0.30,
        }
    }
}

const NON_RETRYABLE_MARKERS: &[&str] = &["insufficient", "invalid order", "rejected"];

fn is_retryable(err: &(dyn Error + 'static)) -> bool {
    let msg = err.to_string().to_lowercase();
    !NON_RETRYABLE_MARKERS.iter().any(|m| msg.contains(m))
}

/// Runs `f` up to `schedule.max_attempts` times, sleeping a jittered
/// exponential backoff between attempts. Stops early (no further retries)
/// once an error matches a non-retryable marker.
pub fn retry_with_backoff<T>(
    schedule: &BackoffSchedule,
    mut f: impl FnMut() -> Result<T, Box<dyn Error>>,
) -> Result<T, Box<dyn Error>> {
    let attempts = schedule.max_attempts.max(1);
    let mut last_err: Option<Box<dyn Error>> = None;

    for attempt in 0..attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_retryable(e.as_ref()) {
                    return Err(e);
                }
                last_err = Some(e);
                if attempt + 1 < attempts {
                    let delay_ms = backoff_delay_ms(schedule, attempt);
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once and only exits via return or with an error set"))
}

fn backoff_delay_ms(schedule: &BackoffSchedule, attempt: u32) -> u64 {
    let base = schedule.base_delay_ms as f64 * schedule.factor.powi(attempt as i32);
    let jitter_span = base * schedule.jitter_frac;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    (base + jitter).max(0.0) as u64
}
