use crate::application::events::BatchEvent;
use crate::application::orchestrator::BatchOrchestrator;
use crate::config::EngineConfig;
use crate::domain::instruction::PaymentInstruction;
use crate::domain::job::{BatchJob, ExecutionMode, JobCounts, JobId, JobStatus, JobTransition};
use crate::domain::ports::{SharedExecutionClient, SharedJobStore};
use crate::domain::validation::{IssueCode, ValidationIssue, validate};
use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

/// A job as returned to callers, with its derived progress counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: BatchJob,
    pub counts: JobCounts,
}

impl From<BatchJob> for JobSnapshot {
    fn from(job: BatchJob) -> Self {
        let counts = job.counts();
        Self { job, counts }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecuteMode {
    Immediate,
    Scheduled,
}

/// Parameters of `execute`. Without a `mode`, a `scheduledAt` implies a
/// scheduled start.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub mode: Option<ExecuteMode>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub concurrency_limit: Option<u32>,
}

impl ExecuteRequest {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn scheduled(at: DateTime<Utc>) -> Self {
        Self {
            mode: Some(ExecuteMode::Scheduled),
            scheduled_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, limit: u32) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }
}

/// The operations exposed to callers: submit, amend, execute, status and the
/// control operations.
pub struct BatchService {
    store: SharedJobStore,
    orchestrator: BatchOrchestrator,
    config: EngineConfig,
}

impl BatchService {
    pub fn new(store: SharedJobStore, client: SharedExecutionClient, config: EngineConfig) -> Self {
        let orchestrator = BatchOrchestrator::new(store.clone(), client, config.retry.clone());
        Self {
            store,
            orchestrator,
            config,
        }
    }

    /// Creates a `Draft` job and validates it. The returned job is `Ready`,
    /// or back in `Draft` carrying the issues found.
    #[instrument(skip_all, fields(items = instructions.len()))]
    pub async fn submit(&self, instructions: Vec<PaymentInstruction>) -> Result<JobSnapshot> {
        let job = BatchJob::draft(instructions, self.config.concurrency.default_limit);
        self.store.create_job(job.clone()).await?;
        info!(job_id = %job.id, "batch submitted");
        Ok(self.validate_draft(job).await?.into())
    }

    /// Replaces the items of a `Draft` job and validates it again.
    #[instrument(skip(self, instructions), fields(items = instructions.len()))]
    pub async fn amend(
        &self,
        job_id: JobId,
        instructions: Vec<PaymentInstruction>,
    ) -> Result<JobSnapshot> {
        let mut job = self.load(job_id).await?;
        job.replace_items(instructions)?;
        self.store.save_job(job.clone()).await?;
        Ok(self.validate_draft(job).await?.into())
    }

    async fn validate_draft(&self, mut job: BatchJob) -> Result<BatchJob> {
        job.apply(JobTransition::BeginValidation)?;
        self.store.update_job_status(job.id, job.status).await?;

        job.issues = validate(&job.payloads(), &self.config.validation);
        let outcome = if job.issues.is_empty() {
            JobTransition::ValidationPassed
        } else {
            JobTransition::ValidationFailed
        };
        job.apply(outcome)?;
        self.store.save_job(job.clone()).await?;

        info!(job_id = %job.id, status = %job.status, issues = job.issues.len(), "batch validated");
        Ok(job)
    }

    /// Starts a `Ready` job now or at `scheduledAt`.
    #[instrument(skip(self, request))]
    pub async fn execute(&self, job_id: JobId, request: ExecuteRequest) -> Result<JobSnapshot> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Ready {
            return Err(BatchError::InvalidState {
                job_id,
                status: job.status,
                action: "execute",
            });
        }

        let mut issues = Vec::new();
        let limit = request.concurrency_limit.unwrap_or(job.concurrency_limit);
        if !self.config.concurrency.accepts(limit) {
            issues.push(ValidationIssue::for_batch(
                "concurrencyLimit",
                IssueCode::ConcurrencyOutOfRange,
                format!(
                    "concurrency limit {limit} must be between 1 and {}",
                    self.config.concurrency.max_limit
                ),
            ));
        }

        let mode = request.mode.unwrap_or(match request.scheduled_at {
            Some(_) => ExecuteMode::Scheduled,
            None => ExecuteMode::Immediate,
        });
        let execution_mode = match (mode, request.scheduled_at) {
            (ExecuteMode::Immediate, _) => ExecutionMode::Immediate,
            (ExecuteMode::Scheduled, Some(at)) => ExecutionMode::Scheduled { at },
            (ExecuteMode::Scheduled, None) => {
                issues.push(ValidationIssue::for_batch(
                    "scheduledAt",
                    IssueCode::MissingSchedule,
                    "scheduled execution needs a start time",
                ));
                ExecutionMode::Immediate
            }
        };
        if !issues.is_empty() {
            return Err(BatchError::Validation(issues));
        }

        self.orchestrator.launch(job_id, execution_mode, limit).await?;
        self.get_status(job_id).await
    }

    /// Latest stored state of the job. Never waits for execution.
    pub async fn get_status(&self, job_id: JobId) -> Result<JobSnapshot> {
        let mut job = self.load(job_id).await?;
        if let Some(reason) = self.orchestrator.degraded(job_id).await {
            job.degraded = Some(reason);
        }
        Ok(job.into())
    }

    pub async fn pause(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.orchestrator.pause(job_id).await?;
        self.get_status(job_id).await
    }

    pub async fn resume(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.orchestrator.resume(job_id).await?;
        self.get_status(job_id).await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.orchestrator.cancel(job_id).await?;
        self.get_status(job_id).await
    }

    /// Picks up jobs a previous process left unfinished. Returns how many
    /// were re-attached.
    pub async fn recover(&self) -> Result<usize> {
        let recovered = self.orchestrator.recover().await?;
        if recovered > 0 {
            info!(recovered, "resumed unfinished jobs");
        }
        Ok(recovered)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.orchestrator.subscribe()
    }

    pub async fn watch_status(&self, job_id: JobId) -> Option<watch::Receiver<JobStatus>> {
        self.orchestrator.watch_status(job_id).await
    }

    pub async fn wait_until_settled(&self, job_id: JobId) {
        self.orchestrator.wait_until_settled(job_id).await
    }

    async fn load(&self, job_id: JobId) -> Result<BatchJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(BatchError::JobNotFound(job_id))
    }
}
