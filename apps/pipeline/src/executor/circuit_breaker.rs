use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::clients::Service;
use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls fail fast with `ServiceUnavailable` until the cool-down elapses.
    Open,
    /// One trial call is in flight to test recovery.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent Open before a trial call is let through.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Proof that a call was admitted. A trial permit must be resolved with
/// `on_success`, `on_failure` or `abandon`, otherwise the half-open slot stays taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPermit {
    Normal,
    Trial,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-service circuit breaker.
///
/// ```text
/// Closed --threshold failures--> Open --cooldown--> HalfOpen --success--> Closed
///                                  ^                    |
///                                  +------failure-------+
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    service: Service,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: Service, config: CircuitBreakerConfig) -> Self {
        Self {
            service,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Admits a call or fails fast.
    pub async fn acquire(&self) -> Result<CircuitPermit, PipelineError> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(CircuitPermit::Normal),
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!(
                        service = %self.service,
                        "Circuit half-open, letting a trial call through"
                    );
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(CircuitPermit::Trial)
                } else {
                    Err(PipelineError::ServiceUnavailable {
                        service: self.service,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(PipelineError::ServiceUnavailable {
                        service: self.service,
                    })
                } else {
                    state.trial_in_flight = true;
                    Ok(CircuitPermit::Trial)
                }
            }
        }
    }

    pub async fn on_success(&self, permit: CircuitPermit) {
        let mut state = self.state.lock().await;
        if permit == CircuitPermit::Trial || state.state == CircuitState::HalfOpen {
            info!(service = %self.service, "Circuit closed after successful trial call");
        }
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
    }

    pub async fn on_failure(&self, permit: CircuitPermit) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;

        match (state.state, permit) {
            (CircuitState::HalfOpen, _) | (_, CircuitPermit::Trial) => {
                warn!(service = %self.service, "Trial call failed, circuit re-opened");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
            }
            (CircuitState::Closed, CircuitPermit::Normal) => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = state.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit opened after consecutive failures"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            // A call admitted before the circuit opened; the cool-down clock keeps running.
            (CircuitState::Open, CircuitPermit::Normal) => {}
        }
    }

    /// Releases a permit whose call never reached the service (and says nothing about
    /// its health).
    pub async fn abandon(&self, permit: CircuitPermit) {
        if permit == CircuitPermit::Trial {
            let mut state = self.state.lock().await;
            state.trial_in_flight = false;
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            Service::Generation,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, 10);
        for _ in 0..3 {
            let permit = cb.acquire().await.unwrap();
            cb.on_failure(permit).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(matches!(
            cb.acquire().await,
            Err(PipelineError::ServiceUnavailable { service: Service::Generation })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_run() {
        let cb = breaker(3, 10);
        for _ in 0..2 {
            let permit = cb.acquire().await.unwrap();
            cb.on_failure(permit).await;
        }
        let permit = cb.acquire().await.unwrap();
        cb.on_success(permit).await;
        for _ in 0..2 {
            let permit = cb.acquire().await.unwrap();
            cb.on_failure(permit).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_trial_after_cooldown() {
        let cb = breaker(1, 10);
        let permit = cb.acquire().await.unwrap();
        cb.on_failure(permit).await;
        assert!(cb.acquire().await.is_err());

        tokio::time::advance(Duration::from_secs(11)).await;
        let trial = cb.acquire().await.unwrap();
        assert_eq!(trial, CircuitPermit::Trial);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        // Second caller while the trial is in flight fails fast.
        assert!(cb.acquire().await.is_err());

        cb.on_success(trial).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.acquire().await.unwrap(), CircuitPermit::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_for_full_cooldown() {
        let cb = breaker(1, 10);
        let permit = cb.acquire().await.unwrap();
        cb.on_failure(permit).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = cb.acquire().await.unwrap();
        cb.on_failure(trial).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.acquire().await.is_err());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cb.acquire().await.unwrap(), CircuitPermit::Trial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_the_slot() {
        let cb = breaker(1, 1);
        let permit = cb.acquire().await.unwrap();
        cb.on_failure(permit).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = cb.acquire().await.unwrap();
        cb.abandon(trial).await;
        assert_eq!(cb.acquire().await.unwrap(), CircuitPermit::Trial);
    }
}
