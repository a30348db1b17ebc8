//! Circuit breaker for exchange requests
//!
//! After `failure_threshold` consecutive failed requests the breaker opens and
//! rejects calls outright. Once `cool_off` has passed it lets requests through
//! again in a probing state; `success_threshold` successes close it, any
//! failure reopens it.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cool_off: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_off: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may go out now. Moves Open to HalfOpen once the
    /// cool-off has elapsed.
    pub fn allow_request(&mut self) -> bool {
        if self.state != CircuitState::Open {
            return true;
        }
        let cooled = self
            .opened_at
            .map_or(true, |t| t.elapsed() >= self.config.cool_off);
        if cooled {
            info!("Circuit breaker half-open, probing exchange");
            self.state = CircuitState::HalfOpen;
            self.probe_successes = 0;
        }
        cooled
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.probe_successes += 1;
            if self.probe_successes >= self.config.success_threshold {
                info!("Circuit breaker closed");
                self.state = CircuitState::Closed;
                self.probe_successes = 0;
            }
        }
    }

    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                failures = self.consecutive_failures,
                cool_off_secs = self.config.cool_off.as_secs(),
                "Circuit breaker opened"
            );
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
            self.probe_successes = 0;
        }
    }
}
