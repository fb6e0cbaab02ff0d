//! Job lifecycle and dispatch.
//!
//! Each executing job gets a `JobRunner`: a queue of its pending items in
//! submission order, a gate that workers consult before claiming, and a
//! bounded set of worker tasks. Control operations (pause, resume, cancel)
//! move the job status and flip the gate; workers never get interrupted in
//! the middle of a backend call.

use crate::application::events::{BatchEvent, EventSender, publish};
use crate::application::executor::ItemExecutor;
use crate::config::RetryPolicy;
use crate::domain::job::{BatchItem, BatchJob, ExecutionMode, JobId, JobStatus, JobTransition};
use crate::domain::ports::{SharedExecutionClient, SharedJobStore};
use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

const EVENT_CAPACITY: usize = 1024;

/// What workers of a job are allowed to do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Claim and execute pending items.
    Open,
    /// Finish the current item, then idle (paused, or waiting for the schedule).
    Closed,
    /// Finish the current item, then exit (cancelled or halted).
    Stop,
}

enum Claim {
    Item(BatchItem),
    Gated,
    Drained,
}

struct Lifecycle {
    status: JobStatus,
    degraded: Option<String>,
}

impl Lifecycle {
    /// Pause and resume only make sense while workers can still be steered.
    fn ensure_dispatching(&self) -> Result<()> {
        match &self.degraded {
            Some(reason) => Err(BatchError::Persistence(format!("dispatch halted: {reason}"))),
            None => Ok(()),
        }
    }
}

struct JobRunner {
    job_id: JobId,
    concurrency: usize,
    scheduled_at: Option<DateTime<Utc>>,
    /// Serializes status transitions of the job.
    lifecycle: Mutex<Lifecycle>,
    /// Pending items in submission order. Claiming happens under this lock.
    queue: Mutex<VecDeque<BatchItem>>,
    gate: watch::Sender<Gate>,
    status: watch::Sender<JobStatus>,
    settled: watch::Sender<bool>,
}

impl JobRunner {
    fn new(job: &BatchJob) -> Self {
        let mut pending: Vec<BatchItem> = job
            .items
            .iter()
            .filter(|item| !item.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|item| item.index);

        let gate = match job.status {
            JobStatus::Running => Gate::Open,
            _ => Gate::Closed,
        };

        Self {
            job_id: job.id,
            concurrency: job.concurrency_limit.max(1) as usize,
            scheduled_at: job.scheduled_at(),
            lifecycle: Mutex::new(Lifecycle {
                status: job.status,
                degraded: None,
            }),
            queue: Mutex::new(pending.into()),
            gate: watch::channel(gate).0,
            status: watch::channel(job.status).0,
            settled: watch::channel(false).0,
        }
    }

    fn checked(&self, status: JobStatus, transition: JobTransition) -> Result<JobStatus> {
        status
            .next(transition)
            .ok_or_else(|| BatchError::InvalidState {
                job_id: self.job_id,
                status,
                action: transition.action(),
            })
    }

    /// Records a new status after it has been persisted.
    fn commit(&self, lifecycle: &mut Lifecycle, status: JobStatus, events: &EventSender) {
        lifecycle.status = status;
        self.status.send_replace(status);
        publish(
            events,
            BatchEvent::JobStatusChanged {
                job_id: self.job_id,
                status,
            },
        );
        info!(job_id = %self.job_id, %status, "job status changed");
    }

    fn mark_degraded(&self, lifecycle: &mut Lifecycle, reason: String, events: &EventSender) {
        self.gate.send_replace(Gate::Stop);
        if lifecycle.degraded.is_none() {
            error!(job_id = %self.job_id, %reason, "dispatch halted");
            lifecycle.degraded = Some(reason.clone());
            publish(
                events,
                BatchEvent::JobDegraded {
                    job_id: self.job_id,
                    reason,
                },
            );
        }
    }

    async fn halt(&self, inner: &Inner, reason: String) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.mark_degraded(&mut lifecycle, reason, &inner.events);
    }

    /// `Ready -> Running` and opens the gate.
    async fn start(&self, inner: &Inner) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let next = self.checked(lifecycle.status, JobTransition::Start)?;
        inner.store.update_job_status(self.job_id, next).await?;
        self.commit(&mut lifecycle, next, &inner.events);
        self.gate.send_replace(Gate::Open);
        Ok(())
    }

    /// Takes the next pending item and records it as `Processing` before
    /// handing it out. The queue lock makes claim-and-mark atomic.
    async fn claim(&self, store: &SharedJobStore) -> Result<Claim> {
        let mut queue = self.queue.lock().await;
        if *self.gate.borrow() != Gate::Open {
            return Ok(Claim::Gated);
        }
        let Some(mut item) = queue.pop_front() else {
            return Ok(Claim::Drained);
        };

        item.claim();
        if let Err(err) = store.update_item_status(&item).await {
            item.requeue();
            queue.push_front(item);
            return Err(err);
        }
        // Paused or cancelled while the claim was being written.
        if *self.gate.borrow() != Gate::Open {
            item.requeue();
            let reverted = store.update_item_status(&item).await;
            queue.push_front(item);
            reverted?;
            return Ok(Claim::Gated);
        }
        Ok(Claim::Item(item))
    }

    /// Settles the job status once no worker is left.
    async fn conclude(&self, inner: &Inner) {
        let mut gate = self.gate.subscribe();
        loop {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.degraded.is_some() {
                return;
            }
            let status = lifecycle.status;
            match status {
                JobStatus::Running => {
                    if let Err(err) = self.finish(inner, &mut lifecycle).await {
                        self.mark_degraded(&mut lifecycle, err.to_string(), &inner.events);
                    }
                    return;
                }
                JobStatus::Paused => {}
                _ => return,
            }
            drop(lifecycle);

            // Paused with nothing left to dispatch: wait for resume or cancel.
            if gate.wait_for(|gate| *gate != Gate::Closed).await.is_err() {
                return;
            }
        }
    }

    async fn finish(&self, inner: &Inner, lifecycle: &mut Lifecycle) -> Result<()> {
        let job = inner
            .store
            .get_job(self.job_id)
            .await?
            .ok_or(BatchError::JobNotFound(self.job_id))?;
        let counts = job.counts();
        if !counts.all_terminal() {
            warn!(job_id = %self.job_id, ?counts, "workers stopped with unfinished items");
            return Ok(());
        }

        let next = self.checked(
            lifecycle.status,
            JobTransition::Finish {
                any_failed: counts.failed > 0,
            },
        )?;
        inner.store.update_job_status(self.job_id, next).await?;
        self.commit(lifecycle, next, &inner.events);
        info!(
            job_id = %self.job_id,
            completed = counts.completed,
            failed = counts.failed,
            "job finished"
        );
        Ok(())
    }
}

struct Inner {
    store: SharedJobStore,
    executor: ItemExecutor,
    events: EventSender,
    runners: RwLock<HashMap<JobId, Arc<JobRunner>>>,
}

/// Owns job execution: dispatches items to a bounded worker pool per job and
/// applies pause, resume and cancel.
///
/// Cloning is cheap; clones share the same runners.
#[derive(Clone)]
pub struct BatchOrchestrator {
    inner: Arc<Inner>,
}

impl BatchOrchestrator {
    pub fn new(store: SharedJobStore, client: SharedExecutionClient, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let executor = ItemExecutor::new(client, store.clone(), retry, events.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                events,
                runners: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    async fn runner(&self, job_id: JobId) -> Option<Arc<JobRunner>> {
        self.inner.runners.read().await.get(&job_id).cloned()
    }

    /// Error for a control operation on a job that has no runner.
    async fn detached(&self, job_id: JobId, action: &'static str) -> BatchError {
        match self.inner.store.get_job(job_id).await {
            Ok(Some(job)) => BatchError::InvalidState {
                job_id,
                status: job.status,
                action,
            },
            Ok(None) => BatchError::JobNotFound(job_id),
            Err(err) => err,
        }
    }

    /// Starts executing a job that is `Ready` in the store, immediately or at
    /// its scheduled time.
    ///
    /// The stored job is re-read under the runners lock, so of two concurrent
    /// launches only the first one sees it `Ready`.
    #[instrument(skip(self, mode))]
    pub async fn launch(
        &self,
        job_id: JobId,
        mode: ExecutionMode,
        concurrency_limit: u32,
    ) -> Result<()> {
        let mut runners = self.inner.runners.write().await;
        let mut job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(BatchError::JobNotFound(job_id))?;
        if job.status != JobStatus::Ready || runners.contains_key(&job_id) {
            return Err(BatchError::InvalidState {
                job_id,
                status: job.status,
                action: "execute",
            });
        }
        job.execution_mode = mode;
        job.concurrency_limit = concurrency_limit;
        self.inner.store.save_job(job.clone()).await?;
        attach(&self.inner, &mut runners, job).await
    }

    pub async fn pause(&self, job_id: JobId) -> Result<()> {
        let Some(runner) = self.runner(job_id).await else {
            return Err(self.detached(job_id, "pause").await);
        };
        let mut lifecycle = runner.lifecycle.lock().await;
        let next = runner.checked(lifecycle.status, JobTransition::Pause)?;
        lifecycle.ensure_dispatching()?;
        self.inner.store.update_job_status(job_id, next).await?;
        runner.gate.send_replace(Gate::Closed);
        runner.commit(&mut lifecycle, next, &self.inner.events);
        Ok(())
    }

    pub async fn resume(&self, job_id: JobId) -> Result<()> {
        let Some(runner) = self.runner(job_id).await else {
            return Err(self.detached(job_id, "resume").await);
        };
        let mut lifecycle = runner.lifecycle.lock().await;
        let next = runner.checked(lifecycle.status, JobTransition::Resume)?;
        lifecycle.ensure_dispatching()?;
        self.inner.store.update_job_status(job_id, next).await?;
        runner.commit(&mut lifecycle, next, &self.inner.events);
        runner.gate.send_replace(Gate::Open);
        Ok(())
    }

    /// Cancels a running, paused or scheduled job. Pending items become
    /// `Cancelled` before this returns; items already in flight finish and
    /// keep their real outcome.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let Some(runner) = self.runner(job_id).await else {
            return Err(self.detached(job_id, "cancel").await);
        };
        let mut lifecycle = runner.lifecycle.lock().await;
        let transition = match lifecycle.status {
            JobStatus::Ready => JobTransition::CancelSchedule,
            _ => JobTransition::Cancel,
        };
        let next = runner.checked(lifecycle.status, transition)?;

        runner.gate.send_replace(Gate::Stop);
        if let Err(err) = self.cancel_pending(&runner).await {
            runner.mark_degraded(&mut lifecycle, err.to_string(), &self.inner.events);
            return Err(err);
        }
        if let Err(err) = self.inner.store.update_job_status(job_id, next).await {
            runner.mark_degraded(&mut lifecycle, err.to_string(), &self.inner.events);
            return Err(err);
        }
        runner.commit(&mut lifecycle, next, &self.inner.events);
        Ok(())
    }

    /// Cancels queued items in order. An item leaves the queue only once its
    /// `Cancelled` status is stored, so a failed cancel leaves the rest queued
    /// for the next attempt.
    async fn cancel_pending(&self, runner: &JobRunner) -> Result<()> {
        let mut queue = runner.queue.lock().await;
        while let Some(front) = queue.front() {
            let mut item = front.clone();
            if item.cancel() {
                self.inner.store.update_item_status(&item).await?;
                publish(
                    &self.inner.events,
                    BatchEvent::ItemFinished {
                        job_id: item.batch_id,
                        item_index: item.index,
                        status: item.status.clone(),
                    },
                );
            }
            queue.pop_front();
        }
        Ok(())
    }

    /// Re-attaches jobs left unfinished by a previous process.
    ///
    /// Items still marked `Processing` had no owner once that process died;
    /// they go back to `Pending` (their attempt count is kept) and are
    /// dispatched again under the same idempotency key.
    pub async fn recover(&self) -> Result<usize> {
        let jobs = self.inner.store.list_incomplete_jobs().await?;
        let mut runners = self.inner.runners.write().await;
        let mut recovered = 0;

        for mut job in jobs {
            if runners.contains_key(&job.id) {
                continue;
            }
            for item in job.items.iter_mut() {
                if item.requeue() {
                    self.inner.store.update_item_status(item).await?;
                }
            }
            info!(job_id = %job.id, status = %job.status, "recovering job");
            attach(&self.inner, &mut runners, job).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Reason dispatch was halted for the job, if it was.
    pub async fn degraded(&self, job_id: JobId) -> Option<String> {
        let runner = self.runner(job_id).await?;
        let lifecycle = runner.lifecycle.lock().await;
        lifecycle.degraded.clone()
    }

    pub async fn watch_status(&self, job_id: JobId) -> Option<watch::Receiver<JobStatus>> {
        self.runner(job_id).await.map(|runner| runner.status.subscribe())
    }

    /// Waits until no worker of the job is active any more. Returns at once
    /// for jobs that are not executing.
    pub async fn wait_until_settled(&self, job_id: JobId) {
        if let Some(runner) = self.runner(job_id).await {
            let mut settled = runner.settled.subscribe();
            // The sender lives in `runner`, which is held here; this cannot
            // observe a closed channel.
            let _ = settled.wait_for(|done| *done).await;
        }
    }
}

async fn attach(
    inner: &Arc<Inner>,
    runners: &mut HashMap<JobId, Arc<JobRunner>>,
    job: BatchJob,
) -> Result<()> {
    let runner = Arc::new(JobRunner::new(&job));
    if job.status == JobStatus::Ready && runner.scheduled_at.is_none() {
        runner.start(inner).await?;
    }
    runners.insert(job.id, runner.clone());
    tokio::spawn(supervise(inner.clone(), runner));
    Ok(())
}

#[instrument(skip_all, fields(job_id = %runner.job_id))]
async fn supervise(inner: Arc<Inner>, runner: Arc<JobRunner>) {
    if let Some(at) = runner.scheduled_at {
        wait_for_schedule(&inner, &runner, at).await;
    }

    let pending = runner.queue.lock().await.len();
    let mut workers = JoinSet::new();
    for worker in 0..runner.concurrency.min(pending) {
        workers.spawn(work(inner.clone(), runner.clone(), worker));
    }
    while let Some(joined) = workers.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(err) => Some(format!("worker stopped unexpectedly: {err}")),
        };
        if let Some(reason) = failure {
            runner.halt(&inner, reason).await;
        }
    }

    runner.conclude(&inner).await;

    let (status, degraded) = {
        let lifecycle = runner.lifecycle.lock().await;
        (lifecycle.status, lifecycle.degraded.is_some())
    };
    // Halted runners stay attached so their degraded state stays visible.
    if !degraded {
        let mut runners = inner.runners.write().await;
        if runners
            .get(&runner.job_id)
            .is_some_and(|attached| Arc::ptr_eq(attached, &runner))
        {
            runners.remove(&runner.job_id);
        }
    }
    runner.settled.send_replace(true);
    publish(
        &inner.events,
        BatchEvent::JobSettled {
            job_id: runner.job_id,
            status,
        },
    );
}

async fn wait_for_schedule(inner: &Inner, runner: &JobRunner, at: DateTime<Utc>) {
    if runner.lifecycle.lock().await.status != JobStatus::Ready {
        return;
    }
    let delay = (at - Utc::now()).to_std().unwrap_or_default();
    info!(%at, ?delay, "waiting for scheduled start");

    let mut gate = runner.gate.subscribe();
    let stopped = async move {
        let _ = gate.wait_for(|gate| *gate == Gate::Stop).await;
    };
    let due = tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = stopped => false,
    };
    if due {
        match runner.start(inner).await {
            // Cancelled while the timer was running.
            Ok(()) | Err(BatchError::InvalidState { .. }) => {}
            Err(err) => runner.halt(inner, err.to_string()).await,
        }
    }
}

#[instrument(skip(inner, runner), fields(job_id = %runner.job_id))]
async fn work(inner: Arc<Inner>, runner: Arc<JobRunner>, worker: usize) -> Result<()> {
    let mut gate = runner.gate.subscribe();
    loop {
        let state = gate
            .wait_for(|gate| *gate != Gate::Closed)
            .await
            .map(|state| *state);
        if !matches!(state, Ok(Gate::Open)) {
            return Ok(());
        }

        let mut item = match runner.claim(&inner.store).await? {
            Claim::Item(item) => item,
            Claim::Gated => continue,
            Claim::Drained => return Ok(()),
        };
        publish(
            &inner.events,
            BatchEvent::ItemClaimed {
                job_id: runner.job_id,
                item_index: item.index,
            },
        );

        inner.executor.execute(&mut item).await?;
        publish(
            &inner.events,
            BatchEvent::ItemFinished {
                job_id: runner.job_id,
                item_index: item.index,
                status: item.status.clone(),
            },
        );
    }
}
