// Persistence behind a capability trait. The orchestrator depends only on `Repository`;
// `memory` backs tests and single-process runs, `postgres` is the production adapter.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::{
    Campaign, CampaignStatus, CandidateRecord, DedupKey, LeadSource, OutreachMessage,
    ProjectRequest, Stage,
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Result of the atomic check-and-insert on a campaign's dedup index.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(CandidateRecord),
    Existing(CandidateRecord),
}

/// A duplicate lead folded into an existing candidate's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub candidate_id: Uuid,
    pub dedup_key: DedupKey,
    pub lead_name: String,
    pub source: LeadSource,
    pub merged_at: DateTime<Utc>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Inserts `record` unless its `(campaign_id, dedup_key)` is taken, in which case the
    /// record already holding that key is returned. Must be atomic under concurrency.
    async fn insert_if_absent(&self, record: CandidateRecord)
        -> Result<InsertOutcome, PipelineError>;

    /// Overwrites an existing candidate. The dedup key of a stored record is immutable.
    async fn save(&self, record: &CandidateRecord) -> Result<(), PipelineError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CandidateRecord>, PipelineError>;

    async fn find_by_dedup_key(
        &self,
        campaign_id: Uuid,
        key: &DedupKey,
    ) -> Result<Option<CandidateRecord>, PipelineError>;

    async fn list_by_stage(
        &self,
        campaign_id: Uuid,
        stage: Stage,
    ) -> Result<Vec<CandidateRecord>, PipelineError>;

    async fn list_by_campaign(&self, campaign_id: Uuid)
        -> Result<Vec<CandidateRecord>, PipelineError>;

    async fn record_merge(&self, merge: &MergeRecord) -> Result<(), PipelineError>;

    async fn merges_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<MergeRecord>, PipelineError>;

    async fn save_project(&self, project: &ProjectRequest) -> Result<(), PipelineError>;

    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRequest>, PipelineError>;

    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), PipelineError>;

    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>, PipelineError>;

    async fn campaigns_with_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, PipelineError>;

    async fn campaigns_for_project(&self, project_id: Uuid)
        -> Result<Vec<Campaign>, PipelineError>;

    async fn save_message(&self, message: &OutreachMessage) -> Result<(), PipelineError>;

    /// Messages for a candidate, oldest first.
    async fn messages_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<OutreachMessage>, PipelineError>;
}
