//! Stage executor: every call to an external collaborator goes through one of these.
//!
//! One executor per service, shared by all campaigns. Each bounds in-flight calls with a
//! semaphore, applies a per-call timeout, retries transient failures with jittered
//! exponential backoff and fails fast through a circuit breaker. Attempt counts live on
//! the candidate record and are checkpointed before every dispatch, so a restart resumes
//! with the budget already spent.

pub mod circuit_breaker;
pub mod retry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;

use crate::clients::{Collaborators, ExternalError, Service};
use crate::errors::PipelineError;
use crate::models::{CandidateRecord, Channel};
use crate::pipeline::state;
use crate::store::Repository;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

pub struct StageExecutor {
    service: Service,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    breaker: CircuitBreaker,
    repo: Arc<dyn Repository>,
}

impl StageExecutor {
    pub fn new(service: Service, config: ExecutorConfig, repo: Arc<dyn Repository>) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            service,
            config,
            permits: Arc::new(Semaphore::new(concurrency)),
            breaker: CircuitBreaker::new(service, config.breaker),
            repo,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Runs `op` on behalf of `record`'s current stage.
    ///
    /// - Budget already spent: `RetryBudgetExhausted`, the service is not called.
    /// - Circuit open: `ServiceUnavailable`, no attempt is counted.
    /// - Transient failure or timeout: the record enters Retrying and the call is repeated
    ///   after a backoff until the budget runs out.
    /// - Provider rate limit: the attempt is refunded and `RateLimitExceeded` returned.
    /// - Anything else: returned as is.
    ///
    /// The record is saved before each dispatch and after each failure.
    pub async fn run_for<T, F, Fut>(
        &self,
        record: &mut CandidateRecord,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        loop {
            let spent = record.attempts_at(record.stage);
            if !self.config.retry.has_budget(spent) {
                return Err(self.exhausted(record, spent));
            }

            let permit = self.breaker.acquire().await?;
            let attempt = record.begin_attempt();
            if let Err(e) = self.repo.save(record).await {
                record.refund_attempt();
                self.breaker.abandon(permit).await;
                return Err(e);
            }

            debug!(
                service = %self.service,
                candidate_id = %record.id,
                stage = %record.stage,
                attempt,
                "Dispatching stage call"
            );

            match self.dispatch(&mut op).await {
                Ok(value) => {
                    self.breaker.on_success(permit).await;
                    record.retrying = false;
                    return Ok(value);
                }
                Err(ExternalError::RateLimited { retry_after }) => {
                    self.breaker.abandon(permit).await;
                    record.refund_attempt();
                    let error = PipelineError::RateLimitExceeded {
                        service: self.service,
                        retry_after,
                    };
                    record.note_failure(&error);
                    self.repo.save(record).await?;
                    return Err(error);
                }
                Err(e @ (ExternalError::Transient(_) | ExternalError::Timeout(_))) => {
                    self.breaker.on_failure(permit).await;
                    let error = e.into_pipeline(self.service);
                    record.note_failure(&error);
                    state::mark_retrying(record);
                    self.repo.save(record).await?;

                    if !self.config.retry.has_budget(attempt) {
                        return Err(self.exhausted(record, attempt));
                    }
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        service = %self.service,
                        candidate_id = %record.id,
                        stage = %record.stage,
                        attempt,
                        max_attempts = self.config.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e @ ExternalError::Permanent(_)) => {
                    // The provider answered; its health is not in question.
                    self.breaker.on_success(permit).await;
                    let error = e.into_pipeline(self.service);
                    record.note_failure(&error);
                    self.repo.save(record).await?;
                    return Err(error);
                }
            }
        }
    }

    /// Same policy as `run_for` for calls not tied to a candidate (search). Attempts are
    /// counted locally.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let mut attempt = 0;
        loop {
            let permit = self.breaker.acquire().await?;
            attempt += 1;

            match self.dispatch(&mut op).await {
                Ok(value) => {
                    self.breaker.on_success(permit).await;
                    return Ok(value);
                }
                Err(e @ ExternalError::RateLimited { .. }) => {
                    self.breaker.abandon(permit).await;
                    return Err(e.into_pipeline(self.service));
                }
                Err(e) => {
                    let error = e.into_pipeline(self.service);
                    if !error.is_retryable() {
                        self.breaker.on_success(permit).await;
                        return Err(error);
                    }
                    self.breaker.on_failure(permit).await;
                    if !self.config.retry.has_budget(attempt) {
                        return Err(PipelineError::RetryBudgetExhausted {
                            service: self.service,
                            attempts: attempt,
                            last_error: error.to_string(),
                        });
                    }
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        service = %self.service,
                        attempt,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn dispatch<T, F, Fut>(&self, op: &mut F) -> Result<T, ExternalError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        let _slot = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExternalError::Transient("executor shut down".to_string()))?;

        match tokio::time::timeout(self.config.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ExternalError::Timeout(self.config.timeout)),
        }
    }

    fn exhausted(&self, record: &CandidateRecord, attempts: u32) -> PipelineError {
        let last_error = record
            .last_error_at(record.stage)
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "no recorded error".to_string());
        PipelineError::RetryBudgetExhausted {
            service: self.service,
            attempts,
            last_error,
        }
    }
}

/// The shared executor set, one per external service.
pub struct ServiceExecutors {
    pub search: StageExecutor,
    pub generation: StageExecutor,
    pub scraping: StageExecutor,
    pub email: StageExecutor,
    pub linkedin: StageExecutor,
}

/// Per-service executor settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExecutorSettings {
    pub search: ExecutorConfig,
    pub generation: ExecutorConfig,
    pub scraping: ExecutorConfig,
    pub email: ExecutorConfig,
    pub linkedin: ExecutorConfig,
}

impl ServiceExecutors {
    /// Send executors never exceed the concurrency their provider advertises.
    pub fn new(
        settings: &ExecutorSettings,
        collaborators: &Collaborators,
        repo: Arc<dyn Repository>,
    ) -> Self {
        let capped = |mut config: ExecutorConfig, channel: Channel| {
            let limit = collaborators.sender(channel).limits().max_concurrency.max(1);
            config.concurrency = config.concurrency.min(limit);
            config
        };

        Self {
            search: StageExecutor::new(Service::Search, settings.search, repo.clone()),
            generation: StageExecutor::new(Service::Generation, settings.generation, repo.clone()),
            scraping: StageExecutor::new(Service::Scraping, settings.scraping, repo.clone()),
            email: StageExecutor::new(
                Service::Email,
                capped(settings.email, Channel::Email),
                repo.clone(),
            ),
            linkedin: StageExecutor::new(
                Service::LinkedIn,
                capped(settings.linkedin, Channel::LinkedIn),
                repo,
            ),
        }
    }

    pub async fn circuit_states(&self) -> Vec<(Service, CircuitState)> {
        let mut states = Vec::with_capacity(5);
        for executor in [
            &self.search,
            &self.generation,
            &self.scraping,
            &self.email,
            &self.linkedin,
        ] {
            states.push((executor.service(), executor.circuit_state().await));
        }
        states
    }

    pub fn for_service(&self, service: Service) -> &StageExecutor {
        match service {
            Service::Search => &self.search,
            Service::Generation => &self.generation,
            Service::Scraping => &self.scraping,
            Service::Email => &self.email,
            Service::LinkedIn => &self.linkedin,
        }
    }

    pub fn for_channel(&self, channel: Channel) -> &StageExecutor {
        self.for_service(Service::for_channel(channel))
    }
}
