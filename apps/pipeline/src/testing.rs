//! Builders and scripted collaborators shared by unit and scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clients::{
    CandidateSearch, Collaborators, ExternalError, MessageSender, ProfileScraper, ProviderLimits,
    SearchCriteria, SearchPage, TextGenerator,
};
use crate::config::PipelineConfig;
use crate::evaluation::EvaluationScore;
use crate::executor::{CircuitBreakerConfig, ExecutorConfig, ExecutorSettings, RetryPolicy};
use crate::models::{
    CandidateLead, CandidateRecord, Channel, DedupKey, LeadSource, OutreachMessage,
    ProfilePatch, ProjectRequest,
};
use crate::outreach::QuotaLimit;

// ────────────────────────────────────────────────────────────────────────────
// Builders
// ────────────────────────────────────────────────────────────────────────────

pub fn lead(name: &str, email: Option<&str>, profile_url: Option<&str>) -> CandidateLead {
    CandidateLead {
        name: name.to_string(),
        email: email.map(str::to_string),
        profile_url: profile_url.map(str::to_string),
        skills: Vec::new(),
        headline: None,
        experience_years: None,
        profile_updated_at: None,
        source: LeadSource {
            provider: "test-search".to_string(),
            external_id: None,
            discovered_at: Utc::now(),
        },
    }
}

pub fn skilled_lead(
    name: &str,
    email: Option<&str>,
    profile_url: &str,
    skills: &[&str],
) -> CandidateLead {
    CandidateLead {
        skills: skills.iter().map(|s| s.to_string()).collect(),
        ..lead(name, email, Some(profile_url))
    }
}

pub fn record_with_key(campaign_id: Uuid, key: &str) -> CandidateRecord {
    CandidateRecord::from_lead(
        campaign_id,
        lead("Test Candidate", None, None),
        DedupKey::from_canonical(key.to_string()),
    )
}

pub fn project(skills: &[(&str, f64)]) -> ProjectRequest {
    ProjectRequest::new("Backend Engineer", skills)
}

pub fn skilled_record(skills: &[&str]) -> CandidateRecord {
    let mut record = record_with_key(Uuid::new_v4(), &format!("url:{}", Uuid::new_v4()));
    record.skills = skills.iter().map(|s| s.to_string()).collect();
    record
}

pub fn scored_record(
    key: &str,
    value: f64,
    profile_updated_at: Option<DateTime<Utc>>,
) -> CandidateRecord {
    let mut record = record_with_key(Uuid::new_v4(), key);
    record.profile_updated_at = profile_updated_at;
    record.score = Some(EvaluationScore {
        value,
        skill_overlap: value / 100.0,
        experience_fit: 0.5,
        matched_skills: Vec::new(),
        missing_skills: Vec::new(),
    });
    record
}

/// Millisecond backoffs, no jitter, breakers that stay closed unless a test says otherwise.
pub fn fast_config() -> PipelineConfig {
    let executor = ExecutorConfig {
        concurrency: 4,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter: 0.0,
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 100,
            cooldown: Duration::from_secs(60),
        },
    };
    PipelineConfig {
        score_floor: 40.0,
        worker_concurrency: 4,
        executors: ExecutorSettings {
            search: executor,
            generation: executor,
            scraping: executor,
            email: executor,
            linkedin: executor,
        },
        quotas: HashMap::from([
            (
                Channel::Email,
                QuotaLimit {
                    max_sends: 1000,
                    window: Duration::from_secs(3600),
                },
            ),
            (
                Channel::LinkedIn,
                QuotaLimit {
                    max_sends: 1000,
                    window: Duration::from_secs(3600),
                },
            ),
        ]),
        ..PipelineConfig::default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted collaborators
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
/// Serves its leads in fixed-size pages behind numeric cursors.
pub struct FakeSearch {
    leads: Vec<CandidateLead>,
    page_size: usize,
    fail_once_at: Mutex<Option<usize>>,
    calls: AtomicU32,
}

impl FakeSearch {
    /// Every lead on a single page.
    pub fn new(leads: Vec<CandidateLead>) -> Self {
        Self::paged(leads, usize::MAX)
    }

    pub fn paged(leads: Vec<CandidateLead>, page_size: usize) -> Self {
        Self {
            leads,
            page_size: page_size.max(1),
            fail_once_at: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// The first fetch of page `index` (zero-based) fails with a 503.
    pub fn failing_once_at(self, index: usize) -> Self {
        *self.fail_once_at.lock().unwrap() = Some(index);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSearch for FakeSearch {
    async fn page(
        &self,
        _criteria: &SearchCriteria,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = cursor.map_or(0, |c| c.parse::<usize>().unwrap());

        let mut fail_once_at = self.fail_once_at.lock().unwrap();
        if *fail_once_at == Some(index) {
            *fail_once_at = None;
            return Err(ExternalError::Transient(format!(
                "status 503: page {}",
                index + 1
            )));
        }

        let start = index.saturating_mul(self.page_size);
        let end = start.saturating_add(self.page_size);
        Ok(SearchPage {
            leads: self.leads.iter().skip(start).take(self.page_size).cloned().collect(),
            next_cursor: (end < self.leads.len()).then(|| (index + 1).to_string()),
        })
    }
}

/// Fails transiently for the first `failures` calls (forever when `None`), then answers.
pub struct ScriptedGenerator {
    failures: Option<u32>,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failures: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _context: &str) -> Result<String, ExternalError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.failures {
            Some(n) if call > n => Ok(format!("Hello! {}", prompt.lines().next().unwrap_or(""))),
            _ => Err(ExternalError::Transient("model overloaded".to_string())),
        }
    }
}

pub struct FakeScraper {
    result: Result<ProfilePatch, ExternalError>,
    calls: AtomicU32,
}

impl FakeScraper {
    pub fn returning(patch: ProfilePatch) -> Self {
        Self {
            result: Ok(patch),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: ExternalError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileScraper for FakeScraper {
    async fn enrich(&self, _profile_url: &str) -> Result<ProfilePatch, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct RecordingSender {
    channel: Channel,
    fail_with: Option<ExternalError>,
    sent: Mutex<Vec<OutreachMessage>>,
}

impl RecordingSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            fail_with: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(channel: Channel, error: ExternalError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new(channel)
        }
    }

    pub fn sent(&self) -> Vec<OutreachMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn limits(&self) -> ProviderLimits {
        ProviderLimits { max_concurrency: 2 }
    }

    async fn send(&self, message: &OutreachMessage) -> Result<String, ExternalError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(format!("dlv-{}", message.id))
    }
}

/// Handles on the fakes behind a `Collaborators` set.
pub struct Fakes {
    pub search: Arc<FakeSearch>,
    pub generator: Arc<ScriptedGenerator>,
    pub scraper: Arc<FakeScraper>,
    pub email: Arc<RecordingSender>,
    pub linkedin: Arc<RecordingSender>,
}

impl Fakes {
    pub fn new(leads: Vec<CandidateLead>) -> Self {
        Self {
            search: Arc::new(FakeSearch::new(leads)),
            generator: Arc::new(ScriptedGenerator::succeeding()),
            scraper: Arc::new(FakeScraper::returning(ProfilePatch::default())),
            email: Arc::new(RecordingSender::new(Channel::Email)),
            linkedin: Arc::new(RecordingSender::new(Channel::LinkedIn)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            search: self.search.clone(),
            generator: self.generator.clone(),
            scraper: self.scraper.clone(),
            email: self.email.clone(),
            linkedin: self.linkedin.clone(),
        }
    }

    pub fn total_sent(&self) -> usize {
        self.email.sent().len() + self.linkedin.sent().len()
    }
}
