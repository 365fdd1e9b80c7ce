use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{Collaborators, SearchCriteria, Service};
use crate::config::PipelineConfig;
use crate::dedup::{DedupService, Registration};
use crate::errors::PipelineError;
use crate::evaluation::{rank, Scorer};
use crate::executor::{CircuitState, ServiceExecutors};
use crate::models::{
    AttemptError, Campaign, CampaignStatus, CandidateRecord, MessageStatus, ProjectRequest,
    ProjectStatus, ResponseSignal, Stage,
};
use crate::outreach::{Admission, ChannelQuota, OutreachScheduler};
use crate::pipeline::state;
use crate::pipeline::steps::{self, SendTicket};
use crate::store::Repository;

/// Campaign ids with a run in progress in this process, and ids asked to stop.
#[derive(Default)]
struct RunControl {
    running: StdMutex<HashSet<Uuid>>,
    cancelling: StdMutex<HashSet<Uuid>>,
}

fn locked<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a campaign as running for as long as it is held.
struct RunGuard {
    control: Arc<RunControl>,
    campaign_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        locked(&self.control.running).remove(&self.campaign_id);
    }
}

/// Drives candidates through the stage machine.
///
/// Cheap to clone; clones share executors, quotas and run bookkeeping.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) config: Arc<PipelineConfig>,
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) dedup: DedupService,
    pub(crate) scorer: Arc<dyn Scorer>,
    pub(crate) executors: Arc<ServiceExecutors>,
    pub(crate) collaborators: Collaborators,
    pub(crate) scheduler: OutreachScheduler,
    control: Arc<RunControl>,
    /// Serializes read-modify-write of campaign documents.
    campaign_lock: Arc<Mutex<()>>,
    /// Serializes the two paths that close out Outreached candidates.
    response_lock: Arc<Mutex<()>>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        repo: Arc<dyn Repository>,
        scorer: Arc<dyn Scorer>,
        collaborators: Collaborators,
        quota: Arc<dyn ChannelQuota>,
    ) -> Self {
        let executors = ServiceExecutors::new(&config.executors, &collaborators, repo.clone());
        Self {
            config: Arc::new(config),
            dedup: DedupService::new(repo.clone()),
            repo,
            scorer,
            executors: Arc::new(executors),
            collaborators,
            scheduler: OutreachScheduler::new(quota),
            control: Arc::new(RunControl::default()),
            campaign_lock: Arc::new(Mutex::new(())),
            response_lock: Arc::new(Mutex::new(())),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Campaign lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Persists the project and a new Running campaign for it. Does not start the run.
    pub async fn start_campaign(&self, project: ProjectRequest) -> Result<Campaign, PipelineError> {
        let project = project.normalized()?;
        if project.status != ProjectStatus::Open {
            return Err(PipelineError::Validation(format!(
                "project {} is not open",
                project.id
            )));
        }

        self.repo.save_project(&project).await?;
        let campaign = Campaign::new(project.id);
        self.repo.save_campaign(&campaign).await?;

        info!(
            campaign_id = %campaign.id,
            project_id = %project.id,
            skills = project.required_skills.len(),
            "Campaign started"
        );
        Ok(campaign)
    }

    /// Runs one pass over the campaign: discovery (once), then every candidate as far as it
    /// can currently go. Calling it again resumes from persisted state.
    pub async fn run_campaign(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        let _guard = self.enter_run(campaign_id)?;

        let campaign = self.load_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Completed | CampaignStatus::Cancelled => return Ok(campaign),
            CampaignStatus::Cancelling => return self.finalize(campaign_id).await,
            CampaignStatus::Running => {}
        }

        let project = Arc::new(self.load_project(campaign.project_id).await?);
        if project.status != ProjectStatus::Open {
            self.request_cancel(campaign_id).await?;
            return self.finalize(campaign_id).await;
        }

        info!(campaign_id = %campaign_id, "Campaign run started");

        if !campaign.discovery_complete {
            self.discover(&campaign, &project).await?;
        }
        self.advance_candidates(campaign_id, &project).await?;
        self.prioritize(campaign_id).await?;
        self.draft_messages(campaign_id, &project).await?;
        self.dispatch_outreach(campaign_id).await?;

        let campaign = self.finalize(campaign_id).await?;
        info!(
            campaign_id = %campaign_id,
            status = ?campaign.status,
            outreached = campaign.count_at(Stage::Outreached),
            failed = campaign.count_at(Stage::Failed),
            rejected = campaign.count_at(Stage::Rejected),
            "Campaign run finished"
        );
        Ok(campaign)
    }

    /// Stops admitting new work. A campaign with no run in progress is cancelled at once;
    /// otherwise the run drains its in-flight calls and finalizes as Cancelled.
    pub async fn cancel_campaign(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        let campaign = self.request_cancel(campaign_id).await?;
        if campaign.status != CampaignStatus::Cancelling || self.is_running(campaign_id) {
            return Ok(campaign);
        }
        self.finalize(campaign_id).await
    }

    /// Project status change. Filled and Cancelled are final and cancel the project's
    /// active campaigns.
    pub async fn set_project_status(
        &self,
        project_id: Uuid,
        status: ProjectStatus,
    ) -> Result<ProjectRequest, PipelineError> {
        let mut project = self.load_project(project_id).await?;
        if project.status == status {
            return Ok(project);
        }
        if project.status != ProjectStatus::Open {
            return Err(PipelineError::Validation(format!(
                "project {project_id} is already {:?}",
                project.status
            )));
        }

        project.status = status;
        self.repo.save_project(&project).await?;
        info!(project_id = %project_id, status = ?status, "Project status changed");

        for campaign in self.repo.campaigns_for_project(project_id).await? {
            if campaign.status == CampaignStatus::Running {
                self.cancel_campaign(campaign.id).await?;
            }
        }
        Ok(project)
    }

    /// Breaker state of every external service.
    pub async fn circuit_states(&self) -> Vec<(Service, CircuitState)> {
        self.executors.circuit_states().await
    }

    /// Campaign with stage counters recomputed from its candidates.
    pub async fn campaign_summary(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        let mut campaign = self.load_campaign(campaign_id).await?;
        let records = self.repo.list_by_campaign(campaign_id).await?;
        campaign.recount(&records);
        Ok(campaign)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Responses
    // ────────────────────────────────────────────────────────────────────────

    /// Closes out an Outreached candidate that answered. Repeating the call is a no-op.
    pub async fn record_response(
        &self,
        candidate_id: Uuid,
        signal: ResponseSignal,
    ) -> Result<CandidateRecord, PipelineError> {
        let _serial = self.response_lock.lock().await;

        let mut record = self
            .repo
            .find_by_id(candidate_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("candidate {candidate_id}")))?;

        if record.stage == Stage::ResponseTracked {
            return Ok(record);
        }
        if record.stage != Stage::Outreached {
            return Err(PipelineError::Validation(format!(
                "candidate {candidate_id} is at {} and not awaiting a response",
                record.stage
            )));
        }

        let messages = self.repo.messages_for_candidate(candidate_id).await?;
        let mut message = match signal.delivery_id.as_deref() {
            Some(delivery_id) => messages
                .into_iter()
                .find(|m| m.delivery_id.as_deref() == Some(delivery_id)),
            None => messages
                .into_iter()
                .rev()
                .find(|m| m.status == MessageStatus::Sent),
        }
        .ok_or_else(|| {
            PipelineError::NotFound(format!("sent message for candidate {candidate_id}"))
        })?;

        message.mark_responded(signal.received_at);
        self.repo.save_message(&message).await?;

        record.responded = Some(true);
        state::apply(&mut record, Stage::ResponseTracked)?;
        self.repo.save(&record).await?;
        info!(candidate_id = %candidate_id, channel = %message.channel, "Response recorded");

        self.refresh_counters(record.campaign_id).await?;
        Ok(record)
    }

    /// Moves Outreached candidates whose no-response timeout has elapsed by `now` to
    /// ResponseTracked with `responded = false`. Returns how many were closed.
    pub async fn expire_unanswered(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u32, PipelineError> {
        let timeout = chrono::Duration::from_std(self.config.response_timeout)
            .map_err(|e| PipelineError::Validation(format!("response timeout out of range: {e}")))?;

        let mut expired = 0;
        {
            let _serial = self.response_lock.lock().await;
            for mut record in self.repo.list_by_stage(campaign_id, Stage::Outreached).await? {
                let sent_at = record
                    .entered_at
                    .get(&Stage::Outreached)
                    .copied()
                    .unwrap_or(record.updated_at);
                if now - sent_at < timeout {
                    continue;
                }
                record.responded = Some(false);
                state::apply(&mut record, Stage::ResponseTracked)?;
                self.repo.save(&record).await?;
                expired += 1;
            }
        }

        if expired > 0 {
            info!(campaign_id = %campaign_id, expired, "Closed out unanswered outreach");
            self.refresh_counters(campaign_id).await?;
        }
        Ok(expired)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Background sweep
    // ────────────────────────────────────────────────────────────────────────

    /// Expires unanswered outreach and resumes every active campaign not already running
    /// in this process. Runs are spawned; the returned count is how many were started.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let mut active = self.repo.campaigns_with_status(CampaignStatus::Running).await?;
        active.extend(self.repo.campaigns_with_status(CampaignStatus::Cancelling).await?);

        let mut started = 0;
        for campaign in active {
            if campaign.status == CampaignStatus::Running {
                self.expire_unanswered(campaign.id, now).await?;
            }
            if self.is_running(campaign.id) {
                continue;
            }
            let orchestrator = self.clone();
            let campaign_id = campaign.id;
            tokio::spawn(async move {
                match orchestrator.run_campaign(campaign_id).await {
                    Ok(_) | Err(PipelineError::AlreadyRunning(_)) => {}
                    Err(e) => error!(campaign_id = %campaign_id, "Campaign resume failed: {e}"),
                }
            });
            started += 1;
        }
        Ok(started)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Phases
    // ────────────────────────────────────────────────────────────────────────

    /// Walks the search pages from the campaign's saved cursor and registers every lead.
    ///
    /// Each page is one call through the search executor, so transient page errors are
    /// retried there. Progress is saved after every page: a deferral or a restart resumes
    /// at the next unread page. Discovery completes on the last page, at the lead limit,
    /// or when a page fails for good.
    async fn discover(
        &self,
        campaign: &Campaign,
        project: &ProjectRequest,
    ) -> Result<(), PipelineError> {
        let campaign_id = campaign.id;
        let criteria = SearchCriteria::for_project(project);
        let limit = project.max_leads;
        let mut cursor = campaign.search_cursor.clone();
        let mut leads_seen = campaign.leads_seen;
        let mut pages = 0_u32;
        let mut accepted = 0_u32;

        loop {
            if self.is_cancelling(campaign_id) {
                break;
            }
            if limit.is_some_and(|max| leads_seen >= max) {
                self.update_campaign(campaign_id, |c| {
                    c.discovery_complete = true;
                    c.search_cursor = None;
                })
                .await?;
                break;
            }

            let search = self.collaborators.search.clone();
            let page = self
                .executors
                .search
                .call(|| {
                    let search = search.clone();
                    let criteria = criteria.clone();
                    let cursor = cursor.clone();
                    async move { search.page(&criteria, cursor.as_deref()).await }
                })
                .await;

            let page = match page {
                Ok(page) => page,
                Err(e) if e.is_deferral() => {
                    warn!(campaign_id = %campaign_id, "Search deferred: {e}");
                    break;
                }
                Err(e) => {
                    warn!(campaign_id = %campaign_id, "Search failed: {e}");
                    self.update_campaign(campaign_id, |c| {
                        c.discovery_complete = true;
                        c.discovery_error = Some(AttemptError::from_error(&e));
                        c.search_cursor = None;
                    })
                    .await?;
                    break;
                }
            };
            pages += 1;

            let mut seen = 0_u32;
            let mut merged = 0_u32;
            for lead in page.leads {
                if limit.is_some_and(|max| leads_seen + seen >= max) {
                    break;
                }
                seen += 1;

                let registration = self.dedup.register(campaign_id, lead).await;
                match registration.and_then(Registration::into_accepted) {
                    Ok(mut record) => {
                        state::apply(&mut record, Stage::Deduplicated)?;
                        self.repo.save(&record).await?;
                        accepted += 1;
                    }
                    Err(PipelineError::DuplicateCandidate { existing_id }) => {
                        debug!(campaign_id = %campaign_id, %existing_id, "Lead merged");
                        merged += 1;
                    }
                    Err(PipelineError::Validation(reason)) => {
                        warn!(campaign_id = %campaign_id, "Lead dropped: {reason}");
                    }
                    Err(e) => return Err(e),
                }
            }
            leads_seen += seen;

            cursor = page.next_cursor;
            let last = cursor.is_none() || limit.is_some_and(|max| leads_seen >= max);
            let next = if last { None } else { cursor.clone() };
            self.update_campaign(campaign_id, |c| {
                c.leads_seen += seen;
                c.leads_merged += merged;
                c.search_cursor = next;
                c.discovery_complete |= last;
            })
            .await?;
            if last {
                break;
            }
        }

        info!(
            campaign_id = %campaign_id,
            pages,
            leads_seen,
            accepted,
            "Discovery pass finished"
        );
        Ok(())
    }

    /// Evaluation and enrichment for every candidate not yet prioritized, concurrently.
    async fn advance_candidates(
        &self,
        campaign_id: Uuid,
        project: &Arc<ProjectRequest>,
    ) -> Result<(), PipelineError> {
        let mut pending = Vec::new();
        for stage in [Stage::Discovered, Stage::Deduplicated, Stage::Evaluated] {
            pending.extend(self.repo.list_by_stage(campaign_id, stage).await?);
        }

        let workers = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for record in pending {
            if self.is_cancelling(campaign_id) {
                break;
            }
            let orchestrator = self.clone();
            let project = Arc::clone(project);
            let workers = workers.clone();
            tasks.spawn(async move {
                let _slot = workers
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled(campaign_id))?;
                let mut record = record;
                let outcome =
                    steps::advance_to_enriched(&orchestrator, &mut record, &project).await;
                orchestrator.settle(record, outcome).await
            });
        }
        join_all(tasks).await
    }

    /// Ranks the campaign's scored, still-unsent candidates and admits Enriched ones into
    /// Prioritized.
    async fn prioritize(&self, campaign_id: Uuid) -> Result<(), PipelineError> {
        let mut ranked = Vec::new();
        for stage in [Stage::Enriched, Stage::Prioritized, Stage::MessageDrafted] {
            ranked.extend(self.repo.list_by_stage(campaign_id, stage).await?);
        }
        rank(&mut ranked);

        for (position, mut record) in ranked.into_iter().enumerate() {
            let priority = Some(position as u32 + 1);
            let promote = record.stage == Stage::Enriched;
            if record.priority == priority && !promote {
                continue;
            }
            record.priority = priority;
            if promote {
                state::apply(&mut record, Stage::Prioritized)?;
            }
            self.repo.save(&record).await?;
        }
        Ok(())
    }

    /// Drafts outreach for every Prioritized candidate, concurrently.
    async fn draft_messages(
        &self,
        campaign_id: Uuid,
        project: &Arc<ProjectRequest>,
    ) -> Result<(), PipelineError> {
        let pending = self.repo.list_by_stage(campaign_id, Stage::Prioritized).await?;

        let workers = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for record in pending {
            if self.is_cancelling(campaign_id) {
                break;
            }
            let orchestrator = self.clone();
            let project = Arc::clone(project);
            let workers = workers.clone();
            tasks.spawn(async move {
                let _slot = workers
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled(campaign_id))?;
                let mut record = record;
                let outcome = steps::draft_message(&orchestrator, &mut record, &project).await;
                orchestrator.settle(record, outcome).await
            });
        }
        join_all(tasks).await
    }

    /// Offers drafted candidates to the scheduler in rank order and sends the admitted ones.
    async fn dispatch_outreach(&self, campaign_id: Uuid) -> Result<(), PipelineError> {
        let mut drafted = self.repo.list_by_stage(campaign_id, Stage::MessageDrafted).await?;
        rank(&mut drafted);

        let workers = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut throttled_channels = HashMap::new();

        for mut record in drafted {
            if self.is_cancelling(campaign_id) {
                break;
            }

            let ticket = match steps::prepare_send(self, &mut record).await {
                Ok(Some(ticket)) => ticket,
                Ok(None) => continue,
                Err(e) => {
                    self.settle(record, Err(e)).await?;
                    continue;
                }
            };

            let channel = ticket.message.channel;
            // Once a channel is full, lower-ranked candidates on it are parked without asking.
            let admission = match throttled_channels.get(&channel) {
                Some(retry_after) => Admission::Throttled {
                    retry_after: *retry_after,
                },
                None => self.scheduler.admit(&record, channel).await?,
            };
            match admission {
                Admission::Allowed => {
                    self.update_campaign(campaign_id, |c| c.record_admission(channel))
                        .await?;
                }
                Admission::Throttled { retry_after } => {
                    throttled_channels.insert(channel, retry_after);
                    let throttle = PipelineError::Throttled {
                        channel,
                        retry_after,
                    };
                    record.note_failure(&throttle);
                    self.settle(record, Err(throttle)).await?;
                    continue;
                }
            }

            let orchestrator = self.clone();
            let workers = workers.clone();
            tasks.spawn(async move {
                let _slot = workers
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled(campaign_id))?;
                let SendTicket { message } = ticket;
                let outcome = steps::send_message(&orchestrator, &mut record, message).await;
                orchestrator.settle(record, outcome).await
            });
        }
        join_all(tasks).await
    }

    /// Recounts and settles the campaign status.
    async fn finalize(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        let records = self.repo.list_by_campaign(campaign_id).await?;
        let campaign = self
            .update_campaign(campaign_id, |c| {
                c.recount(&records);
                match c.status {
                    CampaignStatus::Cancelling => c.status = CampaignStatus::Cancelled,
                    CampaignStatus::Running if c.is_settled() => {
                        c.status = CampaignStatus::Completed
                    }
                    _ => {}
                }
            })
            .await?;

        if campaign.status != CampaignStatus::Running {
            locked(&self.control.cancelling).remove(&campaign_id);
            info!(campaign_id = %campaign_id, status = ?campaign.status, "Campaign closed");
        }
        Ok(campaign)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Candidate outcome handling
    // ────────────────────────────────────────────────────────────────────────

    /// Persists the outcome of one candidate step.
    ///
    /// Deferrals park the candidate (Retrying) at its current stage, storage errors
    /// abort the run, anything else fails the candidate alone.
    pub(crate) async fn settle(
        &self,
        mut record: CandidateRecord,
        outcome: Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        let error = match outcome {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if matches!(error, PipelineError::Storage(_)) {
            return Err(error);
        }
        if matches!(error, PipelineError::Cancelled(_)) || record.is_terminal() {
            return Ok(());
        }
        if error.is_deferral() {
            state::mark_retrying(&mut record);
        } else {
            state::fail(&mut record, &error)?;
        }
        self.repo.save(&record).await
    }

    pub(crate) fn check_cancelled(&self, campaign_id: Uuid) -> Result<(), PipelineError> {
        if self.is_cancelling(campaign_id) {
            Err(PipelineError::Cancelled(campaign_id))
        } else {
            Ok(())
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Bookkeeping
    // ────────────────────────────────────────────────────────────────────────

    fn enter_run(&self, campaign_id: Uuid) -> Result<RunGuard, PipelineError> {
        if !locked(&self.control.running).insert(campaign_id) {
            return Err(PipelineError::AlreadyRunning(campaign_id));
        }
        Ok(RunGuard {
            control: self.control.clone(),
            campaign_id,
        })
    }

    fn is_running(&self, campaign_id: Uuid) -> bool {
        locked(&self.control.running).contains(&campaign_id)
    }

    fn is_cancelling(&self, campaign_id: Uuid) -> bool {
        locked(&self.control.cancelling).contains(&campaign_id)
    }

    async fn request_cancel(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        let campaign = self
            .update_campaign(campaign_id, |c| {
                if c.status == CampaignStatus::Running {
                    c.status = CampaignStatus::Cancelling;
                }
            })
            .await?;
        if campaign.status == CampaignStatus::Cancelling {
            locked(&self.control.cancelling).insert(campaign_id);
            info!(campaign_id = %campaign_id, "Campaign cancelling");
        }
        Ok(campaign)
    }

    async fn refresh_counters(&self, campaign_id: Uuid) -> Result<(), PipelineError> {
        if self.is_running(campaign_id) {
            // The active run recounts when it finishes.
            return Ok(());
        }
        self.finalize(campaign_id).await.map(|_| ())
    }

    async fn update_campaign<F>(
        &self,
        campaign_id: Uuid,
        mutate: F,
    ) -> Result<Campaign, PipelineError>
    where
        F: FnOnce(&mut Campaign),
    {
        let _serial = self.campaign_lock.lock().await;
        let mut campaign = self.load_campaign(campaign_id).await?;
        mutate(&mut campaign);
        campaign.updated_at = Utc::now();
        self.repo.save_campaign(&campaign).await?;
        Ok(campaign)
    }

    async fn load_campaign(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        self.repo
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("campaign {campaign_id}")))
    }

    async fn load_project(&self, project_id: Uuid) -> Result<ProjectRequest, PipelineError> {
        self.repo
            .find_project(project_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("project {project_id}")))
    }
}

/// Waits for every worker, returning the first hard error after all have finished.
async fn join_all(mut tasks: JoinSet<Result<(), PipelineError>>) -> Result<(), PipelineError> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| PipelineError::Storage(format!("worker panicked: {e}")));
        if let Err(e) = result.and_then(|r| r) {
            error!("Candidate worker aborted: {e}");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
