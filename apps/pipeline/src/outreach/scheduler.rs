use std::sync::Arc;

use tracing::info;

use crate::errors::PipelineError;
use crate::models::{CandidateRecord, Channel};
use crate::outreach::quota::{Admission, ChannelQuota};

/// Gatekeeper between drafted messages and the send executors. Callers offer candidates
/// in rank order; the scheduler only decides whether the channel has room right now.
#[derive(Clone)]
pub struct OutreachScheduler {
    quota: Arc<dyn ChannelQuota>,
}

impl OutreachScheduler {
    pub fn new(quota: Arc<dyn ChannelQuota>) -> Self {
        Self { quota }
    }

    pub async fn admit(
        &self,
        record: &CandidateRecord,
        channel: Channel,
    ) -> Result<Admission, PipelineError> {
        let admission = self.quota.try_acquire(channel).await?;
        if let Admission::Throttled { retry_after } = admission {
            info!(
                candidate_id = %record.id,
                %channel,
                retry_after_ms = retry_after.as_millis() as u64,
                "Outreach throttled"
            );
        }
        Ok(admission)
    }

    /// Email when an address is known, otherwise LinkedIn when a profile URL is known.
    /// Returns the channel and the recipient handle for it.
    pub fn choose_channel(record: &CandidateRecord) -> Result<(Channel, String), PipelineError> {
        if let Some(email) = &record.contact.email {
            return Ok((Channel::Email, email.clone()));
        }
        if let Some(url) = &record.contact.profile_url {
            return Ok((Channel::LinkedIn, url.clone()));
        }
        Err(PipelineError::Validation(format!(
            "candidate {} has no reachable contact",
            record.id
        )))
    }
}
