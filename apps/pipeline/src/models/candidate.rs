use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErrorKind, PipelineError};
use crate::evaluation::EvaluationScore;
use crate::models::{Channel, Stage};

/// Canonical identity fingerprint of a candidate within a campaign.
/// Only `dedup::dedup_key_for` constructs these from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub(crate) fn from_canonical(canonical: String) -> Self {
        Self(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub profile_url: Option<String>,
}

/// Where a lead came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSource {
    pub provider: String,
    pub external_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// A raw lead as returned by the search collaborator, before deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateLead {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub experience_years: Option<u32>,
    #[serde(default)]
    pub profile_updated_at: Option<DateTime<Utc>>,
    pub source: LeadSource,
}

/// Partial profile fields returned by the scraping collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub experience_years: Option<u32>,
    #[serde(default)]
    pub profile_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AttemptError {
    pub fn from_error(error: &PipelineError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Attempt bookkeeping for one stage, persisted so retries resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub count: u32,
    pub last_error: Option<AttemptError>,
}

/// One entry of a candidate's stage history. `retry` marks an explicit Retry loop
/// back into the same stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub retry: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub name: String,
    pub skills: BTreeSet<String>,
    pub contact: ContactInfo,
    pub headline: Option<String>,
    pub experience_years: Option<u32>,
    pub profile_updated_at: Option<DateTime<Utc>>,
    pub source: LeadSource,
    pub dedup_key: DedupKey,
    pub stage: Stage,
    /// Set while the current stage is in its Retrying sub-state.
    pub retrying: bool,
    pub score: Option<EvaluationScore>,
    /// 1-based position in the campaign's outreach order, assigned at prioritization.
    pub priority: Option<u32>,
    pub channel: Option<Channel>,
    /// Recorded on entry into ResponseTracked.
    pub responded: Option<bool>,
    /// Why the candidate ended in Rejected or Failed.
    pub outcome_reason: Option<AttemptError>,
    pub attempts: BTreeMap<Stage, StageAttempts>,
    pub entered_at: BTreeMap<Stage, DateTime<Utc>>,
    pub history: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    /// Builds a `Discovered` record from a lead. Skills are normalized into a set.
    pub fn from_lead(campaign_id: Uuid, lead: CandidateLead, dedup_key: DedupKey) -> Self {
        let now = Utc::now();
        let mut entered_at = BTreeMap::new();
        entered_at.insert(Stage::Discovered, now);

        Self {
            id: Uuid::new_v4(),
            campaign_id,
            name: lead.name.split_whitespace().collect::<Vec<_>>().join(" "),
            skills: lead
                .skills
                .iter()
                .filter_map(|s| normalize_skill(s))
                .collect(),
            contact: ContactInfo {
                email: non_blank(lead.email),
                profile_url: non_blank(lead.profile_url),
            },
            headline: non_blank(lead.headline),
            experience_years: lead.experience_years,
            profile_updated_at: lead.profile_updated_at,
            source: lead.source,
            dedup_key,
            stage: Stage::Discovered,
            retrying: false,
            score: None,
            priority: None,
            channel: None,
            responded: None,
            outcome_reason: None,
            attempts: BTreeMap::new(),
            entered_at,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn attempts_at(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).map(|a| a.count).unwrap_or(0)
    }

    pub fn last_error_at(&self, stage: Stage) -> Option<&AttemptError> {
        self.attempts.get(&stage).and_then(|a| a.last_error.as_ref())
    }

    /// Counts a new attempt at the current stage and returns the new total.
    pub fn begin_attempt(&mut self) -> u32 {
        let entry = self.attempts.entry(self.stage).or_default();
        entry.count += 1;
        self.updated_at = Utc::now();
        entry.count
    }

    /// Takes back an attempt that should not count against the budget (rate limiting).
    pub fn refund_attempt(&mut self) {
        if let Some(entry) = self.attempts.get_mut(&self.stage) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    pub fn note_failure(&mut self, error: &PipelineError) {
        let entry = self.attempts.entry(self.stage).or_default();
        entry.last_error = Some(AttemptError::from_error(error));
        self.updated_at = Utc::now();
    }

    /// Fills fields the record is missing from scraped profile data. Known values are kept;
    /// the dedup key is never touched.
    pub fn apply_patch(&mut self, patch: ProfilePatch) {
        if self.contact.email.is_none() {
            self.contact.email = non_blank(patch.email);
        }
        if self.contact.profile_url.is_none() {
            self.contact.profile_url = non_blank(patch.profile_url);
        }
        if self.headline.is_none() {
            self.headline = non_blank(patch.headline);
        }
        if self.experience_years.is_none() {
            self.experience_years = patch.experience_years;
        }
        if patch.profile_updated_at > self.profile_updated_at {
            self.profile_updated_at = patch.profile_updated_at;
        }
        self.skills
            .extend(patch.skills.iter().filter_map(|s| normalize_skill(s)));
        self.updated_at = Utc::now();
    }
}

/// Lowercases and trims a skill tag, collapsing inner whitespace. Blank tags are dropped.
pub fn normalize_skill(raw: &str) -> Option<String> {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> CandidateLead {
        CandidateLead {
            name: "  Ada   Lovelace ".to_string(),
            email: Some("  ".to_string()),
            profile_url: Some("linkedin.com/in/ada".to_string()),
            skills: vec![
                "Rust".to_string(),
                " rust ".to_string(),
                "Distributed  Systems".to_string(),
                "".to_string(),
            ],
            headline: None,
            experience_years: None,
            profile_updated_at: None,
            source: LeadSource {
                provider: "search".to_string(),
                external_id: None,
                discovered_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_from_lead_normalizes_fields() {
        let record = CandidateRecord::from_lead(
            Uuid::new_v4(),
            lead(),
            DedupKey::from_canonical("url:linkedin.com/in/ada".to_string()),
        );
        assert_eq!(record.name, "Ada Lovelace");
        assert_eq!(record.contact.email, None);
        assert_eq!(record.stage, Stage::Discovered);
        assert_eq!(
            record.skills.iter().cloned().collect::<Vec<_>>(),
            vec!["distributed systems".to_string(), "rust".to_string()]
        );
        assert!(record.entered_at.contains_key(&Stage::Discovered));
    }

    #[test]
    fn test_attempt_counters_track_current_stage() {
        let mut record = CandidateRecord::from_lead(
            Uuid::new_v4(),
            lead(),
            DedupKey::from_canonical("k".to_string()),
        );
        assert_eq!(record.begin_attempt(), 1);
        assert_eq!(record.begin_attempt(), 2);
        record.refund_attempt();
        assert_eq!(record.attempts_at(Stage::Discovered), 1);
        assert_eq!(record.attempts_at(Stage::Evaluated), 0);

        record.note_failure(&PipelineError::Validation("bad".to_string()));
        assert_eq!(
            record.last_error_at(Stage::Discovered).map(|e| e.kind),
            Some(ErrorKind::Validation)
        );
    }

    #[test]
    fn test_apply_patch_keeps_known_values() {
        let mut record = CandidateRecord::from_lead(
            Uuid::new_v4(),
            lead(),
            DedupKey::from_canonical("k".to_string()),
        );
        record.apply_patch(ProfilePatch {
            email: Some("ada@example.com".to_string()),
            profile_url: Some("linkedin.com/in/someone-else".to_string()),
            skills: vec!["Go".to_string()],
            experience_years: Some(7),
            ..Default::default()
        });
        assert_eq!(record.contact.email.as_deref(), Some("ada@example.com"));
        assert_eq!(
            record.contact.profile_url.as_deref(),
            Some("linkedin.com/in/ada")
        );
        assert!(record.skills.contains("go"));
        assert_eq!(record.experience_years, Some(7));
    }

    #[test]
    fn test_record_roundtrips_through_json_with_stage_keys() {
        let mut record = CandidateRecord::from_lead(
            Uuid::new_v4(),
            lead(),
            DedupKey::from_canonical("k".to_string()),
        );
        record.begin_attempt();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["attempts"]["discovered"]["count"], 1);
        let back: CandidateRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
