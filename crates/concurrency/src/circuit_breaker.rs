//! Async circuit breaker guarding the relational store: every call into it
//! goes through closed/open/half-open state tracking so that, once the
//! store is unhealthy, reads can fall back to a cached value instead of
//! piling up failing round trips. Writes still propagate the error — a
//! lost write is worse than a failed one. Uses `parking_lot` guards over
//! relational-store health, the same shape as an HTTP backend health
//! breaker ported to this failure domain.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub window_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            window_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    Open,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failures: RwLock<u32>,
    successes: RwLock<u32>,
    last_transition: RwLock<Instant>,
    window_start: RwLock<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failures: RwLock::new(0),
            successes: RwLock::new(0),
            last_transition: RwLock::new(now),
            window_start: RwLock::new(now),
        }
    }

    /// Gate a read before issuing it. `Open` past `open_timeout` transitions
    /// to `HalfOpen` and allows the probe through.
    pub fn is_request_allowed(&self) -> Result<(), CircuitBreakerError> {
        let state = *self.state.read();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if self.last_transition.read().elapsed() >= self.config.open_timeout {
                    self.transition_to(CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(CircuitBreakerError::Open)
                }
            }
        }
    }

    pub fn record_success(&self) {
        match *self.state.read() {
            CircuitState::Closed => *self.failures.write() = 0,
            CircuitState::HalfOpen => {
                let mut successes = self.successes.write();
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    drop(successes);
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        if self.window_start.read().elapsed() >= self.config.window_duration {
            *self.window_start.write() = Instant::now();
            *self.failures.write() = 0;
        }

        match *self.state.read() {
            CircuitState::Closed => {
                let mut failures = self.failures.write();
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    drop(failures);
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    fn transition_to(&self, next: CircuitState) {
        tracing::info!(?next, "circuit breaker transition");
        *self.state.write() = next;
        *self.failures.write() = 0;
        *self.successes.write() = 0;
        *self.last_transition.write() = Instant::now();
    }

    /// Runs `op` gated by the breaker: refuses to call `op` while open,
    /// otherwise records the outcome. Callers on the read path should fall
    /// back to a cached value when this returns `Open`; write callers
    /// should propagate the error.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.is_request_allowed()
            .map_err(CircuitCallError::Breaker)?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitCallError::Inner(err))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitCallError<E> {
    #[error(transparent)]
    Breaker(#[from] CircuitBreakerError),
    #[error("{0}")]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_request_allowed().is_err());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.is_request_allowed().expect("timeout elapsed, probe allowed");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn single_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        breaker.record_failure();
        breaker.is_request_allowed().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
