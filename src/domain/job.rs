use crate::domain::instruction::{IdempotencyKey, PaymentInstruction};
use crate::domain::validation::ValidationIssue;
use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a batch job, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a single item within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Draft,
    Validating,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Applies a lifecycle transition, returning the next status or `None`
    /// when the transition is not legal from `self`.
    pub fn next(self, transition: JobTransition) -> Option<Self> {
        use JobStatus::*;
        use JobTransition as T;

        match (self, transition) {
            (Draft, T::BeginValidation) => Some(Validating),
            (Validating, T::ValidationPassed) => Some(Ready),
            (Validating, T::ValidationFailed) => Some(Draft),
            (Ready, T::Start) => Some(Running),
            (Ready, T::CancelSchedule) => Some(Cancelled),
            (Running, T::Pause) => Some(Paused),
            (Paused, T::Resume) => Some(Running),
            (Running | Paused, T::Cancel) => Some(Cancelled),
            (Running, T::Finish { any_failed: false }) => Some(Completed),
            (Running, T::Finish { any_failed: true }) => Some(Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that move a job through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    BeginValidation,
    ValidationPassed,
    ValidationFailed,
    Start,
    Pause,
    Resume,
    Cancel,
    /// Cancels a job whose scheduled start has not yet fired.
    CancelSchedule,
    Finish {
        any_failed: bool,
    },
}

impl JobTransition {
    pub fn action(self) -> &'static str {
        match self {
            Self::BeginValidation | Self::ValidationPassed | Self::ValidationFailed => "validate",
            Self::Start => "execute",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel | Self::CancelSchedule => "cancel",
            Self::Finish { .. } => "finish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all_fields = "camelCase")]
pub enum ExecutionMode {
    #[default]
    Immediate,
    Scheduled { at: DateTime<Utc> },
}

/// Error recorded against a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

/// Final outcome of executing one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemResult {
    Completed { external_tx_id: String },
    Failed(ItemError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all_fields = "camelCase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed { external_tx_id: String },
    Failed { error: ItemError },
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed { .. } => "Completed",
            Self::Failed { .. } => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl From<ItemResult> for ItemStatus {
    fn from(result: ItemResult) -> Self {
        match result {
            ItemResult::Completed { external_tx_id } => Self::Completed { external_tx_id },
            ItemResult::Failed(error) => Self::Failed { error },
        }
    }
}

/// One payment instruction inside a batch, together with its execution state.
///
/// Status changes go through the methods below, which refuse to move an item
/// out of a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: ItemId,
    pub batch_id: JobId,
    /// Zero-based position in the submitted batch.
    pub index: u32,
    pub payload: PaymentInstruction,
    #[serde(flatten)]
    pub status: ItemStatus,
    pub attempts: u32,
    /// Last retryable error seen while the item is still being worked on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ItemError>,
}

impl BatchItem {
    pub fn new(batch_id: JobId, index: u32, payload: PaymentInstruction) -> Self {
        Self {
            id: ItemId::new(),
            batch_id,
            index,
            payload,
            status: ItemStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(format!("{}:{}", self.batch_id, self.id))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Processing`. Returns whether the item was claimed.
    pub fn claim(&mut self) -> bool {
        if self.status == ItemStatus::Pending {
            self.status = ItemStatus::Processing;
            true
        } else {
            false
        }
    }

    /// `Processing -> Pending`, used when a claim could not be recorded or
    /// when recovering work abandoned by a crashed process.
    pub fn requeue(&mut self) -> bool {
        if self.status == ItemStatus::Processing {
            self.status = ItemStatus::Pending;
            true
        } else {
            false
        }
    }

    /// `Pending -> Cancelled`. In-flight and terminal items are left alone.
    pub fn cancel(&mut self) -> bool {
        if self.status == ItemStatus::Pending {
            self.status = ItemStatus::Cancelled;
            true
        } else {
            false
        }
    }

    /// Records the final outcome of a processing item.
    pub fn settle(&mut self, result: ItemResult) -> bool {
        if self.status == ItemStatus::Processing {
            self.status = result.into();
            self.last_error = None;
            true
        } else {
            false
        }
    }
}

/// Item tallies derived from item statuses; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub progress_percent: u8,
    pub completed_amount: Decimal,
}

impl JobCounts {
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn all_terminal(&self) -> bool {
        self.settled() == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub execution_mode: ExecutionMode,
    pub concurrency_limit: u32,
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    /// Set when dispatch was halted because the job store failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl BatchJob {
    /// Creates a `Draft` job owning one pending item per instruction.
    pub fn draft(instructions: Vec<PaymentInstruction>, concurrency_limit: u32) -> Self {
        let id = JobId::new();
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Draft,
            created_at: now,
            updated_at: now,
            execution_mode: ExecutionMode::Immediate,
            concurrency_limit,
            items: Self::build_items(id, instructions),
            issues: Vec::new(),
            degraded: None,
        }
    }

    /// Replaces the payloads of a draft job. Fails once the job left `Draft`.
    pub fn replace_items(&mut self, instructions: Vec<PaymentInstruction>) -> Result<()> {
        if self.status != JobStatus::Draft {
            return Err(BatchError::ImmutableJob {
                job_id: self.id,
                status: self.status,
            });
        }
        self.items = Self::build_items(self.id, instructions);
        self.issues.clear();
        self.updated_at = Utc::now();
        Ok(())
    }

    fn build_items(id: JobId, instructions: Vec<PaymentInstruction>) -> Vec<BatchItem> {
        instructions
            .into_iter()
            .enumerate()
            .map(|(index, payload)| BatchItem::new(id, index as u32, payload))
            .collect()
    }

    pub fn payloads(&self) -> Vec<PaymentInstruction> {
        self.items.iter().map(|item| item.payload.clone()).collect()
    }

    /// Moves the job to its next status, or reports an `InvalidState` error
    /// leaving the job untouched.
    pub fn apply(&mut self, transition: JobTransition) -> Result<JobStatus> {
        let next = self
            .status
            .next(transition)
            .ok_or_else(|| BatchError::InvalidState {
                job_id: self.id,
                status: self.status,
                action: transition.action(),
            })?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(next)
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts {
            total: self.items.len(),
            ..JobCounts::default()
        };
        for item in &self.items {
            match &item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed { .. } => {
                    counts.completed += 1;
                    counts.completed_amount += item.payload.amount;
                }
                ItemStatus::Failed { .. } => counts.failed += 1,
                ItemStatus::Cancelled => counts.cancelled += 1,
            }
        }
        if counts.total > 0 {
            counts.progress_percent = (counts.settled() * 100 / counts.total) as u8;
        }
        counts
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        match self.execution_mode {
            ExecutionMode::Scheduled { at } => Some(at),
            ExecutionMode::Immediate => None,
        }
    }

    /// Jobs that a restarted process has to pick up again.
    pub fn is_incomplete(&self) -> bool {
        match self.status {
            JobStatus::Running | JobStatus::Paused => true,
            JobStatus::Ready => self.scheduled_at().is_some(),
            _ => false,
        }
    }
}
