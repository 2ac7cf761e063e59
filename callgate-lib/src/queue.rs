//! FIFO admission control for request execution.
//!
//! Jobs wait in arrival order and are started only while fewer than the
//! configured number of jobs are active. There is no background poller:
//! the queue is drained whenever a job is pushed and whenever a running job
//! releases its slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{CapturedResponse, RequestKey, Result};

/// Result delivered to whoever waits for a job
pub(crate) type JobOutcome = Result<CapturedResponse>;

/// The zero-argument executor of a job. It is invoked exactly once, at the
/// moment the job is admitted.
pub(crate) type Executor = Box<dyn FnOnce() -> BoxFuture<'static, JobOutcome> + Send>;

/// Process-wide unique identifier of a queued job and of the in-flight
/// entry it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pending unit of work together with the channel used to settle it
pub(crate) struct QueuedJob {
    id: JobId,
    key: RequestKey,
    token: CancellationToken,
    execute: Executor,
    settle: oneshot::Sender<JobOutcome>,
}

impl QueuedJob {
    /// Create a job and the receiver on which its outcome is delivered.
    ///
    /// The receiver yields an error if the job is dropped without running,
    /// either because it was removed from the queue or because its token was
    /// cancelled before admission.
    pub(crate) fn new(
        id: JobId,
        key: RequestKey,
        token: CancellationToken,
        execute: Executor,
    ) -> (Self, oneshot::Receiver<JobOutcome>) {
        let (settle, settled) = oneshot::channel();
        let job = QueuedJob {
            id,
            key,
            token,
            execute,
            settle,
        };
        (job, settled)
    }

    pub(crate) const fn id(&self) -> JobId {
        self.id
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<QueuedJob>,
    active: usize,
}

/// Holds pending jobs and releases them in FIFO order while the number of
/// active jobs is below `max_concurrent`.
///
/// Invariant: `0 <= active <= max_concurrent`. The job deque and the active
/// counter live behind one mutex, so admission decisions never interleave.
#[derive(Debug)]
pub(crate) struct AdmissionQueue {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

/// Holds one admission slot for the lifetime of a running job.
///
/// Dropping the slot frees it and admits the next job, so a slot is released
/// whether the executor succeeds, fails or panics.
struct Slot {
    queue: Arc<AdmissionQueue>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.queue.release();
    }
}

impl AdmissionQueue {
    /// Create a queue admitting at most `max_concurrent` jobs at a time.
    /// A ceiling of zero is raised to one, since nothing could ever run.
    pub(crate) fn new(max_concurrent: usize) -> Self {
        AdmissionQueue {
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    // All critical sections leave the state consistent, so a poisoned lock
    // is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job and start as many jobs as capacity allows
    pub(crate) fn push(self: &Arc<Self>, job: QueuedJob) {
        log::trace!("Queueing job {} for {}", job.id, job.key);
        self.lock().jobs.push_back(job);
        self.process();
    }

    /// Remove a job that has not been admitted yet.
    ///
    /// Returns `false` if the job already started or is unknown. The removed
    /// job is dropped without invoking its executor.
    pub(crate) fn remove(&self, id: JobId) -> bool {
        let mut state = self.lock();
        match state.jobs.iter().position(|job| job.id == id) {
            Some(index) => {
                let job = state.jobs.remove(index);
                drop(state);
                if let Some(job) = job {
                    log::debug!("Removed queued job {} for {}", job.id, job.key);
                }
                true
            }
            None => false,
        }
    }

    /// Number of jobs currently executing
    pub(crate) fn active(&self) -> usize {
        self.lock().active
    }

    /// Number of jobs waiting for admission
    pub(crate) fn queued(&self) -> usize {
        self.lock().jobs.len()
    }

    pub(crate) const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn release(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.process();
    }

    /// Admit jobs while capacity allows.
    ///
    /// Executors are invoked while the lock is held, so the order in which
    /// jobs start is exactly their queue order, even when slots are freed
    /// concurrently on different worker threads. Invoking an executor only
    /// creates a future; the future itself runs on its own task.
    fn process(self: &Arc<Self>) {
        let mut started = Vec::new();
        {
            let mut state = self.lock();
            while state.active < self.max_concurrent {
                let Some(job) = state.jobs.pop_front() else {
                    break;
                };
                if job.token.is_cancelled() {
                    log::debug!("Skipping cancelled job {} for {}", job.id, job.key);
                    continue;
                }
                state.active += 1;
                log::debug!(
                    "Starting job {} for {} ({}/{} active)",
                    job.id,
                    job.key,
                    state.active,
                    self.max_concurrent
                );
                let QueuedJob {
                    id, execute, settle, ..
                } = job;
                let future = execute();
                let slot = Slot {
                    queue: Arc::clone(self),
                };
                started.push((id, slot, future, settle));
            }
        }

        for (id, slot, future, settle) in started {
            tokio::spawn(async move {
                let outcome = future.await;
                if settle.send(outcome).is_err() {
                    log::trace!("Nobody is waiting for job {id} anymore");
                }
                // Freed only after the outcome has been delivered
                drop(slot);
            });
        }
    }
}
