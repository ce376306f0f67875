//! Bounded background work queue.
//!
//! Jobs are submitted without waiting (`try_send`); a full queue rejects the
//! job instead of blocking the caller. A fixed set of tokio workers drains
//! the queue and retries transient failures with exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::job::{BackgroundJob, JobEvent, JobHandler, JobPhase};
use crate::config::QueueConfig;
use crate::error::JobError;

const EVENT_CAPACITY: usize = 256;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

struct QueuedJob {
    id: String,
    job: BackgroundJob,
}

/// State shared by the queue handle and its workers.
struct Shared {
    receiver: Mutex<mpsc::Receiver<QueuedJob>>,
    events: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
    pending: AtomicUsize,
    idle: Notify,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl Shared {
    fn publish(&self, event: JobEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    shared: Arc<Shared>,
    worker_count: usize,
    started: AtomicBool,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Creates the queue. Jobs can be submitted right away; nothing runs
    /// until [`JobQueue::start`].
    pub fn new(config: &QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            sender,
            shared: Arc::new(Shared {
                receiver: Mutex::new(receiver),
                events,
                shutdown: CancellationToken::new(),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                max_retries: config.max_retries,
                retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            }),
            worker_count: config.workers.max(1),
            started: AtomicBool::new(false),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns the workers on the current tokio runtime. Later calls are
    /// no-ops.
    pub fn start(&self, handler: Arc<dyn JobHandler>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&handler);
            workers.push(tokio::spawn(run_worker(worker_id, shared, handler)));
        }

        info!("Started {} background workers", self.worker_count);
    }

    /// Enqueues `job` and returns its id. Never waits for capacity.
    pub fn submit(&self, job: BackgroundJob) -> Result<String, JobError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(JobError::ChannelClosed);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        let queued = QueuedJob {
            id: id.clone(),
            job: job.clone(),
        };
        if let Err(e) = self.sender.try_send(queued) {
            self.shared.finish_one();
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Work queue full, dropping {} for {}", job.name(), job.subject());
                    JobError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => JobError::ChannelClosed,
            });
        }

        debug!("Queued {} job {} for {}", job.name(), id, job.subject());
        self.shared
            .publish(JobEvent::new(&id, &job, JobPhase::Queued, 0));
        Ok(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Resolves once every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stops accepting jobs, interrupts backoff sleeps and waits for the
    /// workers to exit. Jobs still queued are dropped.
    pub async fn shutdown(&self) {
        info!("Shutting down work queue...");
        self.shared.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.drain(..).collect()
        };
        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker {} panicked: {}", i, e);
            }
        }

        info!("All background workers have stopped");
    }
}

async fn run_worker(worker_id: usize, shared: Arc<Shared>, handler: Arc<dyn JobHandler>) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            job = async { shared.receiver.lock().await.recv().await } => job,
        };
        let Some(queued) = next else {
            debug!("Worker {} job channel closed", worker_id);
            break;
        };

        let span = tracing::info_span!(
            "job",
            job_id = %queued.id,
            kind = queued.job.name(),
            worker = worker_id
        );
        execute(&shared, handler.as_ref(), &queued).instrument(span).await;
        shared.finish_one();
    }

    debug!("Worker {} stopped", worker_id);
}

async fn execute(shared: &Shared, handler: &dyn JobHandler, queued: &QueuedJob) {
    let total_attempts = shared.max_retries.saturating_add(1);

    for attempt in 1..=total_attempts {
        shared.publish(JobEvent::new(&queued.id, &queued.job, JobPhase::Started, attempt));

        let err = match handler.handle(&queued.job).await {
            Ok(()) => {
                debug!("Job {} succeeded on attempt {}", queued.id, attempt);
                shared.publish(JobEvent::new(&queued.id, &queued.job, JobPhase::Succeeded, attempt));
                return;
            }
            Err(e) => e,
        };

        if !err.is_retryable() || attempt == total_attempts {
            error!(
                "Job {} ({} for {}) failed after {} attempt(s): {}",
                queued.id,
                queued.job.name(),
                queued.job.subject(),
                attempt,
                err
            );
            shared.publish(
                JobEvent::new(&queued.id, &queued.job, JobPhase::Failed, attempt)
                    .with_error(err.to_string()),
            );
            return;
        }

        let delay = retry_delay(shared.retry_base_delay, attempt);
        warn!(
            "Job {} failed with retryable error (attempt {}/{}), retrying in {:?}: {}",
            queued.id, attempt, total_attempts, delay, err
        );
        shared.publish(
            JobEvent::new(&queued.id, &queued.job, JobPhase::Retrying, attempt)
                .with_error(err.to_string()),
        );

        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                shared.publish(
                    JobEvent::new(&queued.id, &queued.job, JobPhase::Failed, attempt)
                        .with_error("work queue shut down"),
                );
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Exponential backoff after the `attempt`-th failure, capped at
/// [`MAX_RETRY_DELAY`].
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.checked_mul(factor)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}
