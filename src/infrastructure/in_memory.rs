use crate::domain::job::{BatchItem, BatchJob, JobId, JobStatus};
use crate::domain::ports::JobStore;
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory job store.
///
/// Uses `Arc<RwLock<HashMap<JobId, BatchJob>>>` to allow shared concurrent access.
/// The reference implementation of [`JobStore`], used by tests and by the binary
/// when no database path is configured.
#[derive(Default, Clone)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, BatchJob>>>,
}

impl InMemoryJobStore {
    /// Creates a new, empty in-memory job store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: BatchJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn save_job(&self, job: BatchJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.id) {
            return Err(BatchError::JobNotFound(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(BatchError::JobNotFound(job_id))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn update_item_status(&self, item: &BatchItem) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&item.batch_id)
            .ok_or(BatchError::JobNotFound(item.batch_id))?;
        let stored = job
            .items
            .iter_mut()
            .find(|stored| stored.id == item.id)
            .ok_or_else(|| {
                BatchError::Persistence(format!("item {} not found in job {}", item.id, item.batch_id))
            })?;
        stored.status = item.status.clone();
        stored.attempts = item.attempts;
        stored.last_error = item.last_error.clone();
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<BatchJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&job_id).cloned())
    }

    async fn list_incomplete_jobs(&self) -> Result<Vec<BatchJob>> {
        let jobs = self.jobs.read().await;
        let mut incomplete: Vec<BatchJob> = jobs
            .values()
            .filter(|job| job.is_incomplete())
            .cloned()
            .collect();
        incomplete.sort_by_key(|job| job.created_at);
        Ok(incomplete)
    }
}
