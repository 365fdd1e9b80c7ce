use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttemptError, CandidateRecord, Channel, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Running,
    Cancelling,
    Cancelled,
    Completed,
}

/// A sourcing run for one project.
///
/// The dedup-key -> candidate mapping lives in the repository's unique index on
/// `(campaign_id, dedup_key)`; the campaign itself carries only aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub project_id: Uuid,
    pub status: CampaignStatus,
    /// Set once the last search page has been consumed, the lead limit reached or the
    /// search failed for good. A completed discovery is never re-run.
    pub discovery_complete: bool,
    /// Cursor of the next search page to fetch. Saved after every page so an interrupted
    /// discovery picks up where it stopped instead of re-querying from the start.
    #[serde(default)]
    pub search_cursor: Option<String>,
    /// Why discovery ended early, if it did.
    #[serde(default)]
    pub discovery_error: Option<AttemptError>,
    pub leads_seen: u32,
    pub leads_merged: u32,
    pub stage_counts: BTreeMap<Stage, u32>,
    /// Sends admitted by the outreach scheduler on behalf of this campaign.
    pub channel_usage: BTreeMap<Channel, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(project_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            status: CampaignStatus::Running,
            discovery_complete: false,
            discovery_error: None,
            search_cursor: None,
            leads_seen: 0,
            leads_merged: 0,
            stage_counts: BTreeMap::new(),
            channel_usage: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn recount(&mut self, records: &[CandidateRecord]) {
        self.stage_counts.clear();
        for record in records {
            *self.stage_counts.entry(record.stage).or_insert(0) += 1;
        }
        self.updated_at = Utc::now();
    }

    pub fn count_at(&self, stage: Stage) -> u32 {
        self.stage_counts.get(&stage).copied().unwrap_or(0)
    }

    pub fn record_admission(&mut self, channel: Channel) {
        *self.channel_usage.entry(channel).or_insert(0) += 1;
        self.updated_at = Utc::now();
    }

    /// Every candidate has reached a terminal stage and no more leads will arrive.
    pub fn is_settled(&self) -> bool {
        self.discovery_complete
            && self
                .stage_counts
                .iter()
                .all(|(stage, count)| stage.is_terminal() || *count == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_requires_discovery_and_terminal_candidates() {
        let mut campaign = Campaign::new(Uuid::new_v4());
        assert!(!campaign.is_settled());

        campaign.discovery_complete = true;
        campaign.stage_counts.insert(Stage::ResponseTracked, 2);
        campaign.stage_counts.insert(Stage::Rejected, 1);
        assert!(campaign.is_settled());

        campaign.stage_counts.insert(Stage::Outreached, 1);
        assert!(!campaign.is_settled());
    }

    #[test]
    fn test_record_admission_counts_per_channel() {
        let mut campaign = Campaign::new(Uuid::new_v4());
        campaign.record_admission(Channel::Email);
        campaign.record_admission(Channel::Email);
        campaign.record_admission(Channel::LinkedIn);
        assert_eq!(campaign.channel_usage[&Channel::Email], 2);
        assert_eq!(campaign.channel_usage[&Channel::LinkedIn], 1);
    }
}
