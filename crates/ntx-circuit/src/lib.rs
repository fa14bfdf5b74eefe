//! Circuit breaker state machine: CLOSED → OPEN → HALF_OPEN → CLOSED.
//!
//! Pure and synchronous, same idiom as `ntx-risk::engine` — no I/O, no
//! clock of its own (callers pass `now_ms`), no async. The broker adapter
//! that actually issues calls and routes to a fallback while the breaker
//! is open lives in `ntx-runtime`, which owns the async boundary; this
//! crate only tracks the state transitions and tells the caller what to do.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Consecutive failures (while CLOSED) before tripping to OPEN.
    pub failure_threshold: u32,
    /// Time OPEN must elapse before a single HALF_OPEN probe is allowed.
    pub reset_timeout_ms: i64,
    /// Consecutive successful probes (while HALF_OPEN) before closing.
    pub success_threshold: u32,
    /// Per-call timeout; callers report `CallOutcome::Timeout` if exceeded.
    pub call_timeout_ms: i64,
}

impl CircuitConfig {
    pub fn sane_defaults() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
            call_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermission {
    /// CLOSED: the call may proceed against the primary.
    Allow,
    /// OPEN and `reset_timeout_ms` has not yet elapsed: route to the
    /// fallback, do not call the primary.
    DenyRouteToFallback,
    /// OPEN and `reset_timeout_ms` has elapsed: exactly one probe call is
    /// allowed against the primary (state has moved to HALF_OPEN).
    AllowProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    cfg: CircuitConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at_ms: Option<i64>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitConfig) -> Self {
        Self {
            cfg,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at_ms: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Ask permission before issuing a call. Must be called once per call
    /// attempt; the returned permission tells the caller whether to hit the
    /// primary, the fallback, or send exactly one probe.
    pub fn before_call(&mut self, now_ms: i64) -> CallPermission {
        match self.state {
            CircuitState::Closed => CallPermission::Allow,
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    CallPermission::DenyRouteToFallback
                } else {
                    self.probe_in_flight = true;
                    CallPermission::AllowProbe
                }
            }
            CircuitState::Open => {
                let elapsed = self.opened_at_ms.map(|t| now_ms - t).unwrap_or(0);
                if elapsed >= self.cfg.reset_timeout_ms {
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    self.probe_in_flight = true;
                    CallPermission::AllowProbe
                } else {
                    CallPermission::DenyRouteToFallback
                }
            }
        }
    }

    /// Report the outcome of a call permitted by `before_call`. Returns the
    /// transition taken, if any (for audit logging).
    pub fn on_result(&mut self, now_ms: i64, outcome: CallOutcome) -> Option<StateTransition> {
        let from = self.state;
        match self.state {
            CircuitState::Closed => match outcome {
                CallOutcome::Success => {
                    self.consecutive_failures = 0;
                    None
                }
                CallOutcome::Failure | CallOutcome::Timeout => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.cfg.failure_threshold {
                        self.state = CircuitState::Open;
                        self.opened_at_ms = Some(now_ms);
                        Some(StateTransition {
                            from,
                            to: CircuitState::Open,
                        })
                    } else {
                        None
                    }
                }
            },
            CircuitState::HalfOpen => {
                self.probe_in_flight = false;
                match outcome {
                    CallOutcome::Success => {
                        self.consecutive_successes += 1;
                        if self.consecutive_successes >= self.cfg.success_threshold {
                            self.state = CircuitState::Closed;
                            self.consecutive_failures = 0;
                            self.consecutive_successes = 0;
                            Some(StateTransition {
                                from,
                                to: CircuitState::Closed,
                            })
                        } else {
                            None
                        }
                    }
                    CallOutcome::Failure | CallOutcome::Timeout => {
                        self.state = CircuitState::Open;
                        self.opened_at_ms = Some(now_ms);
                        self.consecutive_successes = 0;
                        Some(StateTransition {
                            from,
                            to: CircuitState::Open,
                        })
                    }
                }
            }
            CircuitState::Open => None,
        }
    }
}
