use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::{
    Campaign, CampaignStatus, CandidateRecord, DedupKey, OutreachMessage, ProjectRequest, Stage,
};
use crate::store::{InsertOutcome, MergeRecord, Repository};

#[derive(Default)]
struct State {
    candidates: HashMap<Uuid, CandidateRecord>,
    /// (campaign_id, dedup_key) -> candidate id
    dedup_index: HashMap<(Uuid, DedupKey), Uuid>,
    merges: Vec<MergeRecord>,
    projects: HashMap<Uuid, ProjectRequest>,
    campaigns: HashMap<Uuid, Campaign>,
    messages: Vec<OutreachMessage>,
}

/// In-process repository. One lock guards every map, so the dedup lookup and the insert
/// in `insert_if_absent` happen under a single acquisition.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut records: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    records
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_if_absent(
        &self,
        record: CandidateRecord,
    ) -> Result<InsertOutcome, PipelineError> {
        let mut state = self.state.lock().await;
        let index_key = (record.campaign_id, record.dedup_key.clone());

        if let Some(existing_id) = state.dedup_index.get(&index_key) {
            let existing = state.candidates.get(existing_id).cloned().ok_or_else(|| {
                PipelineError::Storage(format!("dedup index points at missing {existing_id}"))
            })?;
            return Ok(InsertOutcome::Existing(existing));
        }

        state.dedup_index.insert(index_key, record.id);
        state.candidates.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn save(&self, record: &CandidateRecord) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        match state.candidates.get_mut(&record.id) {
            Some(stored) if stored.dedup_key != record.dedup_key => Err(PipelineError::Validation(
                format!("dedup key of candidate {} cannot change", record.id),
            )),
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("candidate {}", record.id))),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CandidateRecord>, PipelineError> {
        Ok(self.state.lock().await.candidates.get(&id).cloned())
    }

    async fn find_by_dedup_key(
        &self,
        campaign_id: Uuid,
        key: &DedupKey,
    ) -> Result<Option<CandidateRecord>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .dedup_index
            .get(&(campaign_id, key.clone()))
            .and_then(|id| state.candidates.get(id))
            .cloned())
    }

    async fn list_by_stage(
        &self,
        campaign_id: Uuid,
        stage: Stage,
    ) -> Result<Vec<CandidateRecord>, PipelineError> {
        let state = self.state.lock().await;
        Ok(sorted(
            state
                .candidates
                .values()
                .filter(|r| r.campaign_id == campaign_id && r.stage == stage)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<CandidateRecord>, PipelineError> {
        let state = self.state.lock().await;
        Ok(sorted(
            state
                .candidates
                .values()
                .filter(|r| r.campaign_id == campaign_id)
                .cloned()
                .collect(),
        ))
    }

    async fn record_merge(&self, merge: &MergeRecord) -> Result<(), PipelineError> {
        self.state.lock().await.merges.push(merge.clone());
        Ok(())
    }

    async fn merges_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<MergeRecord>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .merges
            .iter()
            .filter(|m| m.candidate_id == candidate_id)
            .cloned()
            .collect())
    }

    async fn save_project(&self, project: &ProjectRequest) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRequest>, PipelineError> {
        Ok(self.state.lock().await.projects.get(&id).cloned())
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>, PipelineError> {
        Ok(self.state.lock().await.campaigns.get(&id).cloned())
    }

    async fn campaigns_with_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn campaigns_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Campaign>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .campaigns
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn save_message(&self, message: &OutreachMessage) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        match state.messages.iter_mut().find(|m| m.id == message.id) {
            Some(stored) => *stored = message.clone(),
            None => state.messages.push(message.clone()),
        }
        Ok(())
    }

    async fn messages_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<OutreachMessage>, PipelineError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.candidate_id == candidate_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record_with_key;

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing_holder() {
        let repo = MemoryRepository::new();
        let campaign_id = Uuid::new_v4();
        let first = record_with_key(campaign_id, "url:linkedin.com/in/a");
        let second = record_with_key(campaign_id, "url:linkedin.com/in/a");

        let InsertOutcome::Inserted(inserted) = repo.insert_if_absent(first).await.unwrap() else {
            panic!("first insert must succeed");
        };
        let InsertOutcome::Existing(existing) = repo.insert_if_absent(second).await.unwrap() else {
            panic!("second insert must observe the first");
        };
        assert_eq!(existing.id, inserted.id);
        assert_eq!(repo.list_by_campaign(campaign_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_key_in_other_campaign_is_independent() {
        let repo = MemoryRepository::new();
        let a = record_with_key(Uuid::new_v4(), "email:a@example.com|name:a");
        let b = record_with_key(Uuid::new_v4(), "email:a@example.com|name:a");
        assert!(matches!(
            repo.insert_if_absent(a).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            repo.insert_if_absent(b).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }

    #[tokio::test]
    async fn test_save_refuses_dedup_key_change() {
        let repo = MemoryRepository::new();
        let campaign_id = Uuid::new_v4();
        let record = record_with_key(campaign_id, "url:a");
        repo.insert_if_absent(record.clone()).await.unwrap();

        let mut changed = record.clone();
        changed.dedup_key = record_with_key(campaign_id, "url:b").dedup_key;
        assert!(matches!(
            repo.save(&changed).await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_stage_filters() {
        let repo = MemoryRepository::new();
        let campaign_id = Uuid::new_v4();
        let mut record = record_with_key(campaign_id, "url:a");
        repo.insert_if_absent(record.clone()).await.unwrap();
        repo.insert_if_absent(record_with_key(campaign_id, "url:b"))
            .await
            .unwrap();

        record.stage = Stage::Deduplicated;
        repo.save(&record).await.unwrap();

        let deduplicated = repo
            .list_by_stage(campaign_id, Stage::Deduplicated)
            .await
            .unwrap();
        assert_eq!(deduplicated.len(), 1);
        assert_eq!(deduplicated[0].id, record.id);
    }
}
