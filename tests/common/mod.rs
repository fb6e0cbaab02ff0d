#![allow(dead_code)]

use async_trait::async_trait;
use bulkpay::application::service::BatchService;
use bulkpay::config::EngineConfig;
use bulkpay::domain::instruction::{IdempotencyKey, PaymentInstruction, PaymentReceipt};
use bulkpay::domain::job::{BatchItem, BatchJob, JobId, JobStatus};
use bulkpay::domain::ports::{ExecutionClient, JobStore};
use bulkpay::error::{BatchError, ExecutionError, Result};
use bulkpay::infrastructure::in_memory::InMemoryJobStore;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

/// How the scripted backend answers payments to a given recipient.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Reject(&'static str),
    /// Fails transiently this many times, then succeeds.
    FlakyFor(u32),
    AlwaysUnavailable,
}

/// Payment backend answering per recipient, recording every call.
///
/// With [`ScriptedClient::gated`], each call blocks until the test releases a
/// permit, which lets tests act while payments are in flight.
pub struct ScriptedClient {
    behaviors: HashMap<String, Behavior>,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<(String, IdempotencyKey)>>,
    in_flight: Mutex<HashSet<IdempotencyKey>>,
    overlapped: AtomicBool,
    current: AtomicUsize,
    peak: AtomicUsize,
    started: watch::Sender<usize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            gate: None,
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            overlapped: AtomicBool::new(false),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: watch::channel(0).0,
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn with(mut self, recipient: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(recipient.to_string(), behavior);
        self
    }

    /// Lets `n` blocked (or future) calls answer.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Waits until at least `n` calls have reached the backend.
    pub async fn wait_started(&self, n: usize) {
        let mut started = self.started.subscribe();
        started.wait_for(|count| *count >= n).await.unwrap();
    }

    pub fn started(&self) -> usize {
        *self.started.borrow()
    }

    /// Recipients in the order their calls reached the backend.
    pub fn recipients(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }

    pub fn calls_for(&self, key: &IdempotencyKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, called)| called == key)
            .count()
    }

    /// Whether two calls with the same idempotency key were ever in flight together.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn submit_payment(
        &self,
        payload: &PaymentInstruction,
        idempotency_key: &IdempotencyKey,
    ) -> std::result::Result<PaymentReceipt, ExecutionError> {
        if !self.in_flight.lock().unwrap().insert(idempotency_key.clone()) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((payload.recipient.clone(), idempotency_key.clone()));
            calls.iter().filter(|(_, key)| key == idempotency_key).count() as u32
        };
        self.started.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.lock().unwrap().remove(idempotency_key);

        let behavior = self
            .behaviors
            .get(&payload.recipient)
            .copied()
            .unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Reject(code) => Err(ExecutionError::terminal(code, "rejected by backend")),
            Behavior::FlakyFor(failures) if attempt <= failures => {
                Err(ExecutionError::retryable("UNAVAILABLE", "backend busy"))
            }
            Behavior::AlwaysUnavailable => {
                Err(ExecutionError::retryable("UNAVAILABLE", "backend down"))
            }
            _ => Ok(PaymentReceipt {
                external_tx_id: format!("tx-{idempotency_key}"),
            }),
        }
    }
}

/// In-memory store whose item writes can be made to fail on demand, and
/// whose reads and item writes can be slowed down.
#[derive(Default, Clone)]
pub struct FlakyStore {
    pub inner: InMemoryJobStore,
    failing: Arc<AtomicBool>,
    read_lag: Arc<Mutex<Duration>>,
    item_write_lag: Arc<Mutex<Duration>>,
}

impl FlakyStore {
    pub fn fail_item_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reads take their snapshot first and return it after `lag`.
    pub fn lag_reads(&self, lag: Duration) {
        *self.read_lag.lock().unwrap() = lag;
    }

    pub fn lag_item_writes(&self, lag: Duration) {
        *self.item_write_lag.lock().unwrap() = lag;
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self, job: BatchJob) -> Result<()> {
        self.inner.create_job(job).await
    }

    async fn save_job(&self, job: BatchJob) -> Result<()> {
        self.inner.save_job(job).await
    }

    async fn update_job_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        self.inner.update_job_status(job_id, status).await
    }

    async fn update_item_status(&self, item: &BatchItem) -> Result<()> {
        let lag = *self.item_write_lag.lock().unwrap();
        if !lag.is_zero() {
            tokio::time::sleep(lag).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BatchError::Persistence("disk full".to_string()));
        }
        self.inner.update_item_status(item).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<BatchJob>> {
        let snapshot = self.inner.get_job(job_id).await;
        let lag = *self.read_lag.lock().unwrap();
        if !lag.is_zero() {
            tokio::time::sleep(lag).await;
        }
        snapshot
    }

    async fn list_incomplete_jobs(&self) -> Result<Vec<BatchJob>> {
        self.inner.list_incomplete_jobs().await
    }
}

pub fn payment(recipient: &str, amount: Decimal) -> PaymentInstruction {
    PaymentInstruction::new(recipient, amount, "USD")
}

/// `count` valid payments to `r0`, `r1`, ...
pub fn payments(count: usize) -> Vec<PaymentInstruction> {
    (0..count)
        .map(|i| payment(&format!("r{i}"), Decimal::from(i as u64 + 1)))
        .collect()
}

pub fn service_with(store: Arc<dyn JobStore>, client: Arc<ScriptedClient>) -> BatchService {
    BatchService::new(store, client, EngineConfig::default())
}

pub fn service(client: Arc<ScriptedClient>) -> BatchService {
    service_with(Arc::new(InMemoryJobStore::new()), client)
}

pub fn write_csv(path: &Path, rows: &[[&str; 3]]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["recipient", "amount", "currency"])?;
    for row in rows {
        wtr.write_record(row)?;
    }

    wtr.flush()?;
    Ok(())
}
