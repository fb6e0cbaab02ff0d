use crate::domain::job::{BatchItem, BatchJob, JobId, JobStatus};
use crate::domain::ports::JobStore;
use crate::error::{BatchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for job headers (the job record without its items).
pub const CF_JOBS: &str = "jobs";
/// Column Family for items, keyed by job id followed by the big-endian item index.
pub const CF_ITEMS: &str = "items";

/// A persistent job store implementation using RocksDB.
///
/// Items live in their own column family so that a status write touches a
/// single small record. Job headers are read-modify-written under a lock.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbJobStore {
    db: Arc<DB>,
    header_lock: Arc<Mutex<()>>,
}

impl RocksDbJobStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("jobs" and "items") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_jobs = ColumnFamilyDescriptor::new(CF_JOBS, Options::default());
        let cf_items = ColumnFamilyDescriptor::new(CF_ITEMS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_jobs, cf_items])?;

        Ok(Self {
            db: Arc::new(db),
            header_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BatchError::Persistence(format!("{name} column family not found")))
    }

    fn item_key(job_id: JobId, index: u32) -> [u8; 20] {
        let mut key = [0u8; 20];
        key[..16].copy_from_slice(job_id.as_bytes());
        key[16..].copy_from_slice(&index.to_be_bytes());
        key
    }

    fn write_header(&self, batch: &mut WriteBatch, job: &BatchJob) -> Result<()> {
        let header = BatchJob {
            items: Vec::new(),
            ..job.clone()
        };
        batch.put_cf(self.cf(CF_JOBS)?, job.id.as_bytes(), serde_json::to_vec(&header)?);
        Ok(())
    }

    fn write_items(&self, batch: &mut WriteBatch, job: &BatchJob) -> Result<()> {
        let items = self.cf(CF_ITEMS)?;
        batch.delete_range_cf(
            items,
            Self::item_key(job.id, 0),
            Self::item_key(job.id, u32::MAX),
        );
        for item in &job.items {
            batch.put_cf(items, Self::item_key(job.id, item.index), serde_json::to_vec(item)?);
        }
        Ok(())
    }

    fn read_header(&self, job_id: JobId) -> Result<Option<BatchJob>> {
        match self.db.get_cf(self.cf(CF_JOBS)?, job_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_items(&self, job_id: JobId) -> Result<Vec<BatchItem>> {
        let prefix = job_id.as_bytes();
        let mut items = Vec::new();
        for entry in self.db.prefix_iterator_cf(self.cf(CF_ITEMS)?, prefix) {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn load(&self, header: BatchJob) -> Result<BatchJob> {
        let items = self.read_items(header.id)?;
        Ok(BatchJob { items, ..header })
    }
}

#[async_trait]
impl JobStore for RocksDbJobStore {
    async fn create_job(&self, job: BatchJob) -> Result<()> {
        let _guard = self.header_lock.lock().await;
        let mut batch = WriteBatch::default();
        self.write_header(&mut batch, &job)?;
        self.write_items(&mut batch, &job)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn save_job(&self, job: BatchJob) -> Result<()> {
        let _guard = self.header_lock.lock().await;
        if self.read_header(job.id)?.is_none() {
            return Err(BatchError::JobNotFound(job.id));
        }
        let mut batch = WriteBatch::default();
        self.write_header(&mut batch, &job)?;
        self.write_items(&mut batch, &job)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let _guard = self.header_lock.lock().await;
        let mut header = self
            .read_header(job_id)?
            .ok_or(BatchError::JobNotFound(job_id))?;
        header.status = status;
        header.updated_at = Utc::now();
        let mut batch = WriteBatch::default();
        self.write_header(&mut batch, &header)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn update_item_status(&self, item: &BatchItem) -> Result<()> {
        let key = Self::item_key(item.batch_id, item.index);
        let items = self.cf(CF_ITEMS)?;
        // Only the mutable fields change; payload and identity come from the stored record.
        let mut stored: BatchItem = match self.db.get_cf(items, key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                return Err(BatchError::Persistence(format!(
                    "item {} not found in job {}",
                    item.id, item.batch_id
                )));
            }
        };
        stored.status = item.status.clone();
        stored.attempts = item.attempts;
        stored.last_error = item.last_error.clone();
        self.db.put_cf(items, key, serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<BatchJob>> {
        match self.read_header(job_id)? {
            Some(header) => Ok(Some(self.load(header)?)),
            None => Ok(None),
        }
    }

    async fn list_incomplete_jobs(&self) -> Result<Vec<BatchJob>> {
        let mut jobs = Vec::new();
        for entry in self.db.iterator_cf(self.cf(CF_JOBS)?, IteratorMode::Start) {
            let (_key, value) = entry?;
            let header: BatchJob = serde_json::from_slice(&value)?;
            if header.is_incomplete() {
                jobs.push(self.load(header)?);
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instruction::PaymentInstruction;
    use crate::domain::job::{ItemResult, ItemStatus};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn job(n: usize) -> BatchJob {
        let instructions = (0..n)
            .map(|i| PaymentInstruction::new(format!("r{i}"), dec!(2.5), "EUR"))
            .collect();
        BatchJob::draft(instructions, 3)
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDbJobStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_JOBS).is_some());
        assert!(store.db.cf_handle(CF_ITEMS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_job_round_trip() {
        let dir = tempdir().unwrap();
        let store = RocksDbJobStore::open(dir.path()).unwrap();
        let job = job(3);

        store.create_job(job.clone()).await.unwrap();
        let retrieved = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(retrieved, job);

        assert!(store.get_job(JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_item_and_status_updates() {
        let dir = tempdir().unwrap();
        let store = RocksDbJobStore::open(dir.path()).unwrap();
        let job = job(2);
        store.create_job(job.clone()).await.unwrap();
        store.create_job(self::job(1)).await.unwrap();

        let mut item = job.items[0].clone();
        item.claim();
        item.attempts = 2;
        item.settle(ItemResult::Completed {
            external_tx_id: "tx-1".to_string(),
        });
        store.update_item_status(&item).await.unwrap();
        store
            .update_job_status(job.id, JobStatus::Running)
            .await
            .unwrap();

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.items.len(), 2);
        assert_eq!(stored.items[0].attempts, 2);
        assert!(matches!(stored.items[0].status, ItemStatus::Completed { .. }));
        assert_eq!(stored.items[1].status, ItemStatus::Pending);

        let incomplete = store.list_incomplete_jobs().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, job.id);
    }

    #[tokio::test]
    async fn test_rocksdb_save_job_replaces_items() {
        let dir = tempdir().unwrap();
        let store = RocksDbJobStore::open(dir.path()).unwrap();
        let mut job = job(4);
        store.create_job(job.clone()).await.unwrap();

        job.replace_items(vec![PaymentInstruction::new("solo", dec!(1), "EUR")])
            .unwrap();
        store.save_job(job.clone()).await.unwrap();

        let stored = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.items.len(), 1);
        assert_eq!(stored.items[0].payload.recipient, "solo");
    }
}
