//! The priority job queue and its single worker.

use super::events::EventChannel;
use super::{Job, JobEvent, JobHandler, JobId, JobOptions, JobPayload, JobStatus, Priority, QueueConfig};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

/// A job in the heap, ordered by priority and then insertion sequence.
#[derive(Debug)]
struct QueuedJob {
    seq: u64,
    job: Job,
}

impl QueuedJob {
    const fn key(&self) -> (u8, std::cmp::Reverse<u64>) {
        (self.job.priority.rank(), std::cmp::Reverse(self.seq))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    retrying: HashMap<JobId, Job>,
    processing: Option<Job>,
    recent_failures: VecDeque<FailedJob>,
    next_seq: u64,
    /// Bumped by `clear_queue`; retry timers from an older epoch are ignored.
    epoch: u64,
}

impl QueueState {
    fn insert(&mut self, mut job: Job) -> usize {
        job.status = JobStatus::Queued;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob { seq, job });
        self.heap.len()
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// A permanently failed job kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    /// Job identifier.
    pub id: JobId,
    /// Job type string.
    pub job_type: &'static str,
    /// Attempts used.
    pub attempts: u32,
    /// The final error.
    pub error: String,
    /// When the job failed.
    pub failed_at: DateTime<Utc>,
}

/// Number of queued jobs per priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    /// High-priority jobs.
    pub high: usize,
    /// Normal-priority jobs.
    pub normal: usize,
    /// Low-priority jobs.
    pub low: usize,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Jobs waiting in the heap.
    pub queued: usize,
    /// Jobs waiting for a retry timer.
    pub retry_scheduled: usize,
    /// Jobs executing (0 or 1).
    pub processing: usize,
    /// Jobs accepted since startup.
    pub enqueued: u64,
    /// Jobs completed since startup.
    pub completed: u64,
    /// Jobs failed permanently since startup.
    pub failed: u64,
    /// Retries scheduled since startup.
    pub retried: u64,
    /// Queued jobs by priority.
    pub by_priority: PriorityCounts,
    /// The most recent permanent failures, oldest first.
    pub recent_failures: Vec<FailedJob>,
}

impl QueueStats {
    /// Returns `true` when nothing is queued, waiting or running.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.queued == 0 && self.retry_scheduled == 0 && self.processing == 0
    }
}

/// Result of one worker step.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// The job that ran.
    pub id: JobId,
    /// Status after the attempt: `Completed`, `RetryScheduled` or `Failed`.
    pub status: JobStatus,
    /// Attempts used so far.
    pub attempts: u32,
    /// Handler result on success.
    pub result: Option<Value>,
    /// Error message on failure.
    pub error: Option<String>,
}

/// Priority job queue with a single active worker and retry/backoff.
///
/// Jobs are dispatched highest priority first and FIFO within a priority.
/// A job that fails with a retryable error goes back into the heap at its
/// original priority after its backoff delay, behind jobs already waiting.
///
/// # Concurrency
///
/// An atomic busy flag guarantees at most one job executes at a time, no
/// matter how many tasks call [`process_next`](Self::process_next). The
/// state mutex is never held across an `.await`.
pub struct JobQueue {
    state: Mutex<QueueState>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    busy: AtomicBool,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    events: EventChannel,
    counters: QueueCounters,
}

/// Clears the busy flag when a worker step ends, including on panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Returns the in-flight job to the heap if its step is dropped before the
/// handler finishes, e.g. when the worker task is aborted.
struct InFlightGuard<'a> {
    queue: &'a JobQueue,
    id: JobId,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.restore_interrupted(self.id);
        }
    }
}

impl JobQueue {
    /// Creates a queue that runs jobs with `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let events = EventChannel::new(config.event_capacity);
        Self {
            state: Mutex::new(QueueState::default()),
            handler,
            config,
            busy: AtomicBool::new(false),
            wake: Notify::new(),
            shutdown,
            events,
            counters: QueueCounters::default(),
        }
    }

    /// Returns the queue configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds a job and wakes the worker. Never executes inline.
    pub fn enqueue(&self, payload: JobPayload, options: JobOptions) -> JobId {
        let mut job = Job::new(
            payload,
            options.priority,
            options.max_retries.unwrap_or(self.config.max_retries),
            options.retry_delay_ms.unwrap_or(self.config.retry_delay_ms),
        );
        job.backoff = options.backoff;
        let id = job.id;
        let job_type = job.job_type();
        let priority = job.priority;

        let depth = self.lock().insert(job);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("feedgate_queue_depth").set(depth as f64);
        tracing::debug!(job_id = %id, job_type, %priority, depth, "Job enqueued");
        self.events.publish(JobEvent::Enqueued {
            id,
            job_type,
            priority,
        });
        self.wake.notify_one();
        id
    }

    /// Adds a job described by a type string and untyped payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownJobType`] or [`Error::InvalidInput`]; in both
    /// cases no job is created.
    pub fn enqueue_raw(&self, job_type: &str, payload: Value, options: JobOptions) -> Result<JobId> {
        let payload = JobPayload::from_raw(job_type, payload).inspect_err(|e| {
            tracing::warn!(job_type, error = %e, "Rejected job");
        })?;
        Ok(self.enqueue(payload, options))
    }

    /// Runs one job from the head of the queue.
    ///
    /// Returns `None` when the queue is empty or another step is already
    /// running.
    pub async fn process_next(self: &Arc<Self>) -> Option<JobOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _busy = BusyGuard(&self.busy);

        let job = {
            let mut state = self.lock();
            let mut job = state.heap.pop()?.job;
            job.status = JobStatus::Processing;
            job.attempts += 1;
            state.processing = Some(job.clone());
            metrics::gauge!("feedgate_queue_depth").set(state.heap.len() as f64);
            job
        };

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            job_type = job.job_type(),
            attempt = job.attempts
        );
        self.events.publish(JobEvent::Started {
            id: job.id,
            job_type: job.job_type(),
            attempt: job.attempts,
        });

        let mut in_flight = InFlightGuard {
            queue: self,
            id: job.id,
            armed: true,
        };
        let started = Instant::now();
        let result = self.handler.handle(&job).instrument(span.clone()).await;
        in_flight.armed = false;
        metrics::histogram!("feedgate_job_duration_seconds", "job_type" => job.job_type())
            .record(started.elapsed().as_secs_f64());

        let _entered = span.enter();
        Some(match result {
            Ok(value) => self.complete(job, value),
            Err(err) if err.is_retryable() && job.has_attempts_left() => self.schedule_retry(job, &err),
            Err(err) => self.fail(job, &err),
        })
    }

    fn complete(&self, mut job: Job, value: Value) -> JobOutcome {
        job.status = JobStatus::Completed;
        self.lock().processing = None;
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("feedgate_jobs_total", "job_type" => job.job_type(), "outcome" => "completed")
            .increment(1);
        tracing::info!(attempts = job.attempts, "Job completed");
        self.events.publish(JobEvent::Completed {
            id: job.id,
            job_type: job.job_type(),
            attempts: job.attempts,
        });
        JobOutcome {
            id: job.id,
            status: job.status,
            attempts: job.attempts,
            result: Some(value),
            error: None,
        }
    }

    fn schedule_retry(self: &Arc<Self>, mut job: Job, err: &Error) -> JobOutcome {
        let delay = job
            .backoff
            .delay(job.retry_delay_ms, job.attempts, self.config.max_retry_delay_ms);
        let message = err.to_string();
        job.status = JobStatus::RetryScheduled;
        job.last_error = Some(message.clone());
        let id = job.id;
        let attempts = job.attempts;

        let epoch = {
            let mut state = self.lock();
            state.processing = None;
            state.retrying.insert(id, job);
            state.epoch
        };
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("feedgate_job_retries_total", "error" => err.kind()).increment(1);
        tracing::warn!(
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Job failed, retry scheduled"
        );
        self.events.publish(JobEvent::RetryScheduled {
            id,
            attempt: attempts,
            delay_ms: delay.as_millis() as u64,
            error: message.clone(),
        });

        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.requeue(id, epoch);
            }
        });

        JobOutcome {
            id,
            status: JobStatus::RetryScheduled,
            attempts,
            result: None,
            error: Some(message),
        }
    }

    fn requeue(&self, id: JobId, epoch: u64) {
        let depth = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            let Some(job) = state.retrying.remove(&id) else {
                return;
            };
            state.insert(job)
        };
        metrics::gauge!("feedgate_queue_depth").set(depth as f64);
        tracing::debug!(job_id = %id, depth, "Retrying job re-queued");
        self.wake.notify_one();
    }

    /// Puts an interrupted job back in the heap with its attempt refunded.
    fn restore_interrupted(&self, id: JobId) {
        let depth = {
            let mut state = self.lock();
            let Some(mut job) = state.processing.take_if(|job| job.id == id) else {
                return;
            };
            job.attempts = job.attempts.saturating_sub(1);
            state.insert(job)
        };
        metrics::gauge!("feedgate_queue_depth").set(depth as f64);
        tracing::warn!(job_id = %id, depth, "Job interrupted before finishing, re-queued");
        self.wake.notify_one();
    }

    fn fail(&self, mut job: Job, err: &Error) -> JobOutcome {
        let message = err.to_string();
        job.status = JobStatus::Failed;
        job.last_error = Some(message.clone());

        {
            let mut state = self.lock();
            state.processing = None;
            if self.config.recent_failures > 0 {
                if state.recent_failures.len() >= self.config.recent_failures {
                    state.recent_failures.pop_front();
                }
                state.recent_failures.push_back(FailedJob {
                    id: job.id,
                    job_type: job.job_type(),
                    attempts: job.attempts,
                    error: message.clone(),
                    failed_at: Utc::now(),
                });
            }
        }
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("feedgate_jobs_total", "job_type" => job.job_type(), "outcome" => "failed")
            .increment(1);
        tracing::error!(
            attempts = job.attempts,
            retryable = err.is_retryable(),
            error = %message,
            "Job failed permanently"
        );
        self.events.publish(JobEvent::Failed {
            id: job.id,
            job_type: job.job_type(),
            attempts: job.attempts,
            error: message.clone(),
        });
        JobOutcome {
            id: job.id,
            status: job.status,
            attempts: job.attempts,
            result: None,
            error: Some(message),
        }
    }

    /// Returns queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let mut by_priority = PriorityCounts::default();
        for queued in &state.heap {
            match queued.job.priority {
                Priority::High => by_priority.high += 1,
                Priority::Normal => by_priority.normal += 1,
                Priority::Low => by_priority.low += 1,
            }
        }
        QueueStats {
            queued: state.heap.len(),
            retry_scheduled: state.retrying.len(),
            processing: usize::from(state.processing.is_some()),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            by_priority,
            recent_failures: state.recent_failures.iter().cloned().collect(),
        }
    }

    /// Returns queued jobs in dispatch order, then jobs awaiting a retry.
    #[must_use]
    pub fn queued_jobs(&self) -> Vec<Job> {
        let state = self.lock();
        let mut queued: Vec<&QueuedJob> = state.heap.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));

        let mut retrying: Vec<&Job> = state.retrying.values().collect();
        retrying.sort_by_key(|job| job.id);

        queued
            .into_iter()
            .map(|q| &q.job)
            .chain(retrying)
            .cloned()
            .collect()
    }

    /// Returns the job currently executing.
    #[must_use]
    pub fn in_flight(&self) -> Option<Job> {
        self.lock().processing.clone()
    }

    /// Discards queued and retry-scheduled jobs. Returns how many.
    ///
    /// The in-flight job, if any, runs to completion; if it then schedules a
    /// retry, that retry is kept.
    pub fn clear_queue(&self) -> usize {
        let count = {
            let mut state = self.lock();
            let count = state.heap.len() + state.retrying.len();
            state.heap.clear();
            state.retrying.clear();
            state.epoch += 1;
            count
        };
        metrics::gauge!("feedgate_queue_depth").set(0.0);
        tracing::info!(count, "Queue cleared");
        self.events.publish(JobEvent::Cleared { count });
        count
    }

    /// Subscribes to job lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Asks the worker to stop once the in-flight job finishes.
    ///
    /// A stopped queue does not restart; jobs left in it stay inspectable.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.wake.notify_one();
    }

    /// Starts the worker task.
    ///
    /// The worker wakes on every tick of `tick_interval_ms` and whenever a job
    /// is enqueued or re-queued, then drains the queue one job at a time.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> WorkerHandle {
        let queue = Arc::clone(self);
        let task = tokio::spawn(run_worker(Arc::clone(self)));
        WorkerHandle {
            queue,
            task: Some(task),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

async fn run_worker(queue: Arc<JobQueue>) {
    let mut shutdown = queue.shutdown.subscribe();
    let mut tick = tokio::time::interval(queue.config.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(tick_ms = queue.config.tick_interval_ms, "Job worker started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {},
            _ = tick.tick() => {},
            () = queue.wake.notified() => {},
        }
        if *shutdown.borrow() {
            break;
        }
        while queue.process_next().await.is_some() {
            if *shutdown.borrow() {
                break;
            }
        }
    }

    tracing::info!("Job worker stopped");
}

/// Handle for the worker task. Aborts the task on drop; a job interrupted by
/// the abort goes back into the queue.
#[derive(Debug)]
pub struct WorkerHandle {
    queue: Arc<JobQueue>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stops the worker after its in-flight job and waits for it to exit.
    pub async fn stop(mut self) {
        self.queue.shutdown();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Job worker exited abnormally");
        }
    }

    /// Returns `true` while the worker task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
