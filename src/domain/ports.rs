use super::instruction::{IdempotencyKey, PaymentInstruction, PaymentReceipt};
use super::job::{BatchItem, BatchJob, JobId, JobStatus};
use crate::error::{ExecutionError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable record of jobs and their items.
///
/// Implementations only store what they are given; lifecycle rules live in
/// the domain types and the orchestrator.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: BatchJob) -> Result<()>;
    /// Replaces the whole job record, items included.
    async fn save_job(&self, job: BatchJob) -> Result<()>;
    async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> Result<()>;
    /// Writes status, attempts and last error of one item of `item.batch_id`.
    async fn update_item_status(&self, item: &BatchItem) -> Result<()>;
    async fn get_job(&self, job_id: JobId) -> Result<Option<BatchJob>>;
    /// Jobs a freshly started process must re-attach to (see `BatchJob::is_incomplete`).
    async fn list_incomplete_jobs(&self) -> Result<Vec<BatchJob>>;
}

/// The payment backend that actually moves money.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn submit_payment(
        &self,
        payload: &PaymentInstruction,
        idempotency_key: &IdempotencyKey,
    ) -> std::result::Result<PaymentReceipt, ExecutionError>;
}

pub type SharedJobStore = Arc<dyn JobStore>;
pub type SharedExecutionClient = Arc<dyn ExecutionClient>;
