//! Circuit breaker for the ledger endpoint.
//!
//! Consecutive transport failures first degrade the endpoint, then put it in
//! a cooldown during which calls fail fast instead of piling up timeouts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Healthy,
    /// Failing, but calls still go through
    Degraded,
    /// Calls fail fast until the cooldown elapses
    CoolingDown,
}

/// Snapshot of the breaker, for logging.
#[derive(Debug, Clone)]
pub struct EndpointHealthStats {
    pub state: EndpointState,
    pub consecutive_failures: u32,
    /// Share of successful calls in the current window
    pub success_rate: f64,
    /// Calls in the current window
    pub total_attempts: usize,
}

/// Health tracker for one endpoint. Not thread safe; callers wrap it in a
/// mutex.
pub struct CircuitBreaker {
    state: EndpointState,
    consecutive_failures: u32,
    /// Set while cooling down
    cooldown_start: Option<Instant>,
    /// Outcome of the last `sample_size` calls
    window: VecDeque<bool>,
    /// Consecutive failures before degrading; twice this starts a cooldown
    failure_threshold: u32,
    cooldown_duration: Duration,
    sample_size: usize,
}

impl CircuitBreaker {
    /// Thresholds and window size below 1 are raised to 1.
    pub fn new(failure_threshold: u32, cooldown_seconds: u64, sample_size: usize) -> Self {
        Self {
            state: EndpointState::Healthy,
            consecutive_failures: 0,
            cooldown_start: None,
            window: VecDeque::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown_duration: Duration::from_secs(cooldown_seconds),
            sample_size: sample_size.max(1),
        }
    }

    /// Record a completed call. Restores health once the window's success
    /// rate is above 70%.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.push_attempt(true);

        if self.state != EndpointState::Healthy && self.success_rate() > 0.7 {
            debug!("Ledger endpoint recovered to healthy state");
            self.state = EndpointState::Healthy;
        }
    }

    /// Record a transient failure.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.push_attempt(false);

        match self.state {
            EndpointState::Healthy if self.consecutive_failures >= self.failure_threshold => {
                warn!(failures = self.consecutive_failures, "Ledger endpoint degraded");
                self.state = EndpointState::Degraded;
            }
            EndpointState::Degraded if self.consecutive_failures >= self.failure_threshold * 2 => {
                warn!(
                    failures = self.consecutive_failures,
                    cooldown_secs = self.cooldown_duration.as_secs(),
                    "Ledger endpoint entering cooldown"
                );
                self.state = EndpointState::CoolingDown;
                self.cooldown_start = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// Whether a call may be attempted now. Ends an expired cooldown.
    pub fn is_available(&mut self) -> bool {
        match self.state {
            EndpointState::Healthy | EndpointState::Degraded => true,
            EndpointState::CoolingDown => match self.cooldown_start {
                Some(start) if start.elapsed() < self.cooldown_duration => false,
                _ => {
                    debug!("Ledger endpoint cooldown expired, moving to degraded state");
                    self.state = EndpointState::Degraded;
                    self.cooldown_start = None;
                    self.consecutive_failures = 0;
                    true
                }
            },
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn stats(&self) -> EndpointHealthStats {
        EndpointHealthStats {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            total_attempts: self.window.len(),
        }
    }

    fn push_attempt(&mut self, success: bool) {
        if self.window.len() == self.sample_size {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }

    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|&&ok| ok).count();
        successes as f64 / self.window.len() as f64
    }
}
