//! Deduplication: canonical identity and at-most-once acceptance of leads per campaign.
//!
//! `register` is the pipeline's single hard consistency point: the repository's
//! check-and-insert is atomic, so concurrent leads sharing a key produce exactly one
//! `Accepted` and every other caller sees `DuplicateOf` that same record.

mod key;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

pub use key::dedup_key_for;

use crate::errors::PipelineError;
use crate::models::{CandidateLead, CandidateRecord};
use crate::store::{InsertOutcome, MergeRecord, Repository};

#[derive(Debug, Clone)]
pub enum Registration {
    /// The lead became a new `Discovered` record holding its dedup key.
    Accepted(CandidateRecord),
    /// The key was already held; the lead was folded into this record's merge log.
    DuplicateOf(CandidateRecord),
}

impl Registration {
    /// The new record, or `DuplicateCandidate` naming the record that already holds the key.
    pub fn into_accepted(self) -> Result<CandidateRecord, PipelineError> {
        match self {
            Registration::Accepted(record) => Ok(record),
            Registration::DuplicateOf(existing) => Err(PipelineError::DuplicateCandidate {
                existing_id: existing.id,
            }),
        }
    }
}

#[derive(Clone)]
pub struct DedupService {
    repo: Arc<dyn Repository>,
}

impl DedupService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn register(
        &self,
        campaign_id: Uuid,
        lead: CandidateLead,
    ) -> Result<Registration, PipelineError> {
        let key = dedup_key_for(&lead)?;
        let lead_name = lead.name.clone();
        let source = lead.source.clone();
        let record = CandidateRecord::from_lead(campaign_id, lead, key.clone());

        match self.repo.insert_if_absent(record).await? {
            InsertOutcome::Inserted(record) => Ok(Registration::Accepted(record)),
            InsertOutcome::Existing(existing) => {
                let merge = MergeRecord {
                    id: Uuid::new_v4(),
                    campaign_id,
                    candidate_id: existing.id,
                    dedup_key: key,
                    lead_name,
                    source,
                    merged_at: Utc::now(),
                };
                self.repo.record_merge(&merge).await?;
                info!(
                    candidate_id = %existing.id,
                    provider = %merge.source.provider,
                    "Merged duplicate lead into existing candidate"
                );
                Ok(Registration::DuplicateOf(existing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use crate::testing::lead;

    #[tokio::test]
    async fn test_case_variant_urls_produce_one_record() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = DedupService::new(repo.clone());
        let campaign_id = Uuid::new_v4();

        let a = lead("A", None, Some("linkedin.com/in/a"));
        let b = lead("A", None, Some("LinkedIn.com/in/A"));
        let (ra, rb) = tokio::join!(
            dedup.register(campaign_id, a),
            dedup.register(campaign_id, b)
        );

        let outcomes = [ra.unwrap(), rb.unwrap()];
        let accepted: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                Registration::Accepted(r) => Some(r.id),
                _ => None,
            })
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(repo.list_by_campaign(campaign_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_accepts_exactly_once() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = DedupService::new(repo.clone());
        let campaign_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..32 {
            let dedup = dedup.clone();
            let email = if i % 2 == 0 {
                "Grace@Example.com"
            } else {
                " grace@example.com "
            };
            let l = lead("Grace  Hopper", Some(email), None);
            handles.push(tokio::spawn(async move { dedup.register(campaign_id, l).await }));
        }

        let mut accepted = Vec::new();
        let mut duplicate_of = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                Registration::Accepted(r) => accepted.push(r.id),
                Registration::DuplicateOf(r) => duplicate_of.push(r.id),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(duplicate_of.len(), 31);
        assert!(duplicate_of.iter().all(|id| *id == accepted[0]));
        assert_eq!(repo.list_by_campaign(campaign_id).await.unwrap().len(), 1);
        assert_eq!(
            repo.merges_for_candidate(accepted[0]).await.unwrap().len(),
            31
        );
    }

    #[tokio::test]
    async fn test_unkeyable_lead_is_rejected_without_insert() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = DedupService::new(repo.clone());
        let campaign_id = Uuid::new_v4();

        let result = dedup.register(campaign_id, lead("Ghost", None, None)).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
        assert!(repo.list_by_campaign(campaign_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_registration_names_the_existing_record() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = DedupService::new(repo.clone());
        let campaign_id = Uuid::new_v4();

        let first = dedup
            .register(campaign_id, lead("Ada", Some("ada@example.com"), None))
            .await
            .unwrap()
            .into_accepted()
            .unwrap();
        let second = dedup
            .register(campaign_id, lead("Ada L.", Some("ADA@example.com"), None))
            .await
            .unwrap()
            .into_accepted();

        assert!(matches!(
            second,
            Err(PipelineError::DuplicateCandidate { existing_id }) if existing_id == first.id
        ));
    }
}
