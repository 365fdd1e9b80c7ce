//! External collaborators: the narrow capability traits the pipeline core consumes.
//!
//! The orchestrator only ever sees these traits. Concrete transports live beside them:
//! `http` for JSON-over-HTTP search/scraping/send providers and `llm` for text generation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::PipelineError;
use crate::models::{CandidateLead, Channel, OutreachMessage, ProfilePatch, ProjectRequest};

pub mod http;
pub mod llm;

/// The external services a stage executor can front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Search,
    Generation,
    Scraping,
    Email,
    #[serde(rename = "linkedin")]
    LinkedIn,
}

impl Service {
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Email => Service::Email,
            Channel::LinkedIn => Service::LinkedIn,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Search => "search",
            Service::Generation => "generation",
            Service::Scraping => "scraping",
            Service::Email => "email",
            Service::LinkedIn => "linkedin",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a collaborator call can fail with, before the executor attaches service context.
#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("provider rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl ExternalError {
    pub fn into_pipeline(self, service: Service) -> PipelineError {
        match self {
            ExternalError::Transient(message) => {
                PipelineError::TransientExternal { service, message }
            }
            ExternalError::Timeout(after) => PipelineError::TransientExternal {
                service,
                message: format!("timed out after {}ms", after.as_millis()),
            },
            ExternalError::Permanent(message) => {
                PipelineError::PermanentExternal { service, message }
            }
            ExternalError::RateLimited { retry_after } => {
                PipelineError::RateLimitExceeded {
                    service,
                    retry_after,
                }
            }
        }
    }
}

/// Query handed to the search collaborator, derived from a project request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub skills: Vec<String>,
    pub title: String,
    pub location: Option<String>,
    pub limit: Option<u32>,
}

impl SearchCriteria {
    pub fn for_project(project: &ProjectRequest) -> Self {
        Self {
            skills: project.required_skills.keys().cloned().collect(),
            title: project.title.clone(),
            location: project.location.clone(),
            limit: project.max_leads,
        }
    }
}

/// One page of search results. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub leads: Vec<CandidateLead>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Cursor-paginated search. Each page is a separate call so the search executor can retry,
/// throttle and break on any of them.
#[async_trait]
pub trait CandidateSearch: Send + Sync {
    async fn page(
        &self,
        criteria: &SearchCriteria,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ExternalError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `context` carries the standing instructions the prompt is evaluated under.
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, ExternalError>;
}

#[async_trait]
pub trait ProfileScraper: Send + Sync {
    /// May return partial data; absent fields stay `None`.
    async fn enrich(&self, profile_url: &str) -> Result<ProfilePatch, ExternalError>;
}

/// Provider-side limits a sender advertises; they cap the send executor's concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_concurrency: usize,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> Channel;

    fn limits(&self) -> ProviderLimits;

    /// Returns the provider's delivery id.
    async fn send(&self, message: &OutreachMessage) -> Result<String, ExternalError>;
}

/// The full set of collaborators handed to the orchestrator at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn CandidateSearch>,
    pub generator: Arc<dyn TextGenerator>,
    pub scraper: Arc<dyn ProfileScraper>,
    pub email: Arc<dyn MessageSender>,
    pub linkedin: Arc<dyn MessageSender>,
}

impl Collaborators {
    pub fn sender(&self, channel: Channel) -> Arc<dyn MessageSender> {
        match channel {
            Channel::Email => Arc::clone(&self.email),
            Channel::LinkedIn => Arc::clone(&self.linkedin),
        }
    }

    /// Each send slot must hold a sender for its own channel.
    pub fn check_senders(&self) -> Result<(), PipelineError> {
        for channel in [Channel::Email, Channel::LinkedIn] {
            let actual = self.sender(channel).channel();
            if actual != channel {
                return Err(PipelineError::Validation(format!(
                    "{channel} slot holds the {actual} sender"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fakes, RecordingSender};

    #[test]
    fn test_timeout_maps_to_transient() {
        let err = ExternalError::Timeout(Duration::from_secs(3)).into_pipeline(Service::Scraping);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("3000ms"));
    }

    #[test]
    fn test_rate_limit_maps_to_deferral() {
        let err = ExternalError::RateLimited {
            retry_after: Some(Duration::from_secs(10)),
        }
        .into_pipeline(Service::Email);
        assert!(!err.is_retryable());
        assert!(err.is_deferral());
    }

    #[test]
    fn test_criteria_uses_normalized_skills() {
        let project = ProjectRequest::new("Platform", &[("Rust", 2.0), ("Go", 3.0)]);
        let criteria = SearchCriteria::for_project(&project);
        assert_eq!(criteria.skills, vec!["go".to_string(), "rust".to_string()]);
        assert_eq!(criteria.title, "Platform");
    }

    #[test]
    fn test_sender_in_wrong_slot_is_refused() {
        let mut fakes = Fakes::new(vec![]);
        assert!(fakes.collaborators().check_senders().is_ok());

        fakes.linkedin = Arc::new(RecordingSender::new(Channel::Email));
        let result = fakes.collaborators().check_senders();
        assert!(matches!(result, Err(PipelineError::Validation(m)) if m.contains("linkedin")));
    }
}
