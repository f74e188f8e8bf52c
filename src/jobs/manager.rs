//! Background job manager.
//!
//! Runs user work on a bounded worker pool and marshals every outcome back
//! to the control thread, where the [`JobGuard`] decides whether it is
//! applied or discarded.
//!
//! # Lifecycle
//!
//! ```text
//!  submit ──► Queued ──► Running ──► Completed ─┐
//!                │                   Cancelled ─┼──► (control thread) ──► Applied
//!                └── cancelled early ──────────►│                     └─► Discarded
//!                                    Failed ────┘
//! ```
//!
//! A job's result is applied only if the job is still the current one of its
//! type when the delivery runs. Everything else is dropped with a debug log.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::control::ControlPost;
use super::guard::{JobGuard, JobId};
use crate::error::JobError;
use crate::sync::lock;

// =============================================================================
// Outcome & State
// =============================================================================

/// What a worker produced.
#[derive(Debug)]
pub enum JobOutcome<T> {
    /// The work returned a value and the job was not cancelled
    Completed(T),

    /// The job was cancelled before or while running
    Cancelled,

    /// The work returned an error or panicked
    Failed(JobError),
}

impl<T> JobOutcome<T> {
    /// The outcome without its payload.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            JobOutcome::Completed(_) => OutcomeKind::Completed,
            JobOutcome::Cancelled => OutcomeKind::Cancelled,
            JobOutcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// Convert into a `Result`, mapping cancellation to `JobError::Cancelled`.
    pub fn into_result(self) -> Result<T, JobError> {
        match self {
            JobOutcome::Completed(value) => Ok(value),
            JobOutcome::Cancelled => Err(JobError::Cancelled),
            JobOutcome::Failed(err) => Err(err),
        }
    }
}

/// Payload-free outcome, recorded in [`JobState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Completed,
    Cancelled,
    Failed,
}

/// What the control thread did with a delivered outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the continuation
    Applied,

    /// Dropped because a newer job of the same type superseded it
    Discarded,
}

/// Per-job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    /// Worker is done; delivery is waiting on the control thread
    Finished(OutcomeKind),
    /// Terminal
    Delivered(OutcomeKind, Disposition),
}

/// A progress report, delivered on the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: JobId,

    /// Percentage, clamped to `0..=100`
    pub value: u8,

    pub message: String,
}

type ProgressCallback = Arc<dyn Fn(JobProgress) + Send + Sync>;

fn set_state(state: &Mutex<JobState>, next: JobState) {
    *lock(state) = next;
}

// =============================================================================
// Job Handle
// =============================================================================

/// Handle returned by [`JobManager::submit`].
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    job_type: Arc<str>,
    token: CancellationToken,
    guard: Arc<JobGuard>,
    state: Arc<Mutex<JobState>>,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Request cooperative cancellation.
    ///
    /// Flips the token and, if this job is still current for its type,
    /// clears the registry entry so its result can no longer be applied.
    pub fn cancel(&self) {
        self.token.cancel();
        if self.guard.clear_job_id_if(&self.job_type, self.job_id) {
            debug!(job_id = %self.job_id, job_type = %self.job_type, "Job cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Current position in the job state machine.
    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    /// True once the worker side is done, delivered or not.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            JobState::Finished(_) | JobState::Delivered(..)
        )
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("job_type", &self.job_type)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Job Context
// =============================================================================

/// Passed to the work closure on the worker thread.
pub struct JobContext {
    job_id: JobId,
    job_type: Arc<str>,
    token: CancellationToken,
    guard: Arc<JobGuard>,
    post: Arc<dyn ControlPost>,
    on_progress: Option<ProgressCallback>,
}

impl JobContext {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancellation checkpoint for long-running loops.
    ///
    /// ```ignore
    /// for t in 0..frames {
    ///     ctx.checkpoint()?;
    ///     accumulate(t);
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.token.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The underlying token, for work that wants to await cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Report progress to the submitter.
    ///
    /// `value` is clamped to `0..=100`. The report is posted to the control
    /// thread and dropped there if the job is no longer current.
    pub fn report_progress(&self, value: i64, message: impl Into<String>) {
        let Some(callback) = self.on_progress.clone() else {
            return;
        };
        let progress = JobProgress {
            job_id: self.job_id,
            value: value.clamp(0, 100) as u8,
            message: message.into(),
        };
        let guard = self.guard.clone();
        let job_type = self.job_type.clone();
        self.post.post(Box::new(move || {
            if guard.is_current_job(&job_type, progress.job_id) {
                callback(progress);
            }
        }));
    }
}

// =============================================================================
// Job Manager
// =============================================================================

struct InFlight {
    job_type: Arc<str>,
    token: CancellationToken,
}

type InFlightMap = Arc<Mutex<HashMap<JobId, InFlight>>>;

/// Submits work to a bounded worker pool and delivers results on the
/// control thread.
///
/// # Example
///
/// ```ignore
/// let mut control = ControlQueue::new();
/// let jobs = JobManager::new(Handle::current(), 4, Arc::new(JobGuard::new()), control.poster());
///
/// jobs.submit("render", |n: u64, ctx| {
///     ctx.checkpoint()?;
///     Ok(n * 2)
/// }, 21, |outcome| {
///     if let JobOutcome::Completed(v) = outcome {
///         println!("got {v}");
///     }
/// });
///
/// // Control loop iteration
/// control.drain();
/// ```
pub struct JobManager {
    guard: Arc<JobGuard>,
    post: Arc<dyn ControlPost>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    in_flight: InFlightMap,
}

impl JobManager {
    /// Create a manager running at most `workers` jobs at once (minimum 1).
    ///
    /// # Arguments
    ///
    /// * `runtime` - Tokio runtime the pool runs on
    /// * `workers` - Maximum number of concurrently running jobs
    /// * `guard` - Registry consulted before any delivery is applied
    /// * `post` - Transport to the control thread
    pub fn new<P>(runtime: Handle, workers: usize, guard: Arc<JobGuard>, post: P) -> Self
    where
        P: ControlPost + 'static,
    {
        let workers = workers.max(1);
        Self {
            guard,
            post: Arc::new(post),
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The guard this manager publishes ids to.
    pub fn guard(&self) -> &Arc<JobGuard> {
        &self.guard
    }

    /// Pool size.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs submitted but not yet delivered.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Submit `work(args, ctx)` as the new current job of `job_type`.
    ///
    /// Any earlier job of the same type is superseded immediately: its
    /// result will be discarded even if it finishes later. `on_complete`
    /// runs on the control thread, only if this job is still current then.
    pub fn submit<A, T, F, C>(&self, job_type: &str, work: F, args: A, on_complete: C) -> JobHandle
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(A, &JobContext) -> Result<T, JobError> + Send + 'static,
        C: FnOnce(JobOutcome<T>) + Send + 'static,
    {
        self.spawn_job(job_type, work, args, on_complete, None)
    }

    /// Like [`submit`](Self::submit), with a progress callback that also
    /// runs on the control thread.
    pub fn submit_with_progress<A, T, F, C, P>(
        &self,
        job_type: &str,
        work: F,
        args: A,
        on_complete: C,
        on_progress: P,
    ) -> JobHandle
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(A, &JobContext) -> Result<T, JobError> + Send + 'static,
        C: FnOnce(JobOutcome<T>) + Send + 'static,
        P: Fn(JobProgress) + Send + Sync + 'static,
    {
        self.spawn_job(job_type, work, args, on_complete, Some(Arc::new(on_progress)))
    }

    /// Cancel a job. Equivalent to [`JobHandle::cancel`].
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    /// Cancel every job that has not been delivered yet.
    pub fn cancel_all(&self) {
        let in_flight = lock(&self.in_flight);
        for (job_id, job) in in_flight.iter() {
            job.token.cancel();
            self.guard.clear_job_id_if(&job.job_type, *job_id);
        }
        if !in_flight.is_empty() {
            debug!(count = in_flight.len(), "Cancelled all in-flight jobs");
        }
    }

    /// Cancel `handle` if it has not finished within `timeout`.
    pub fn cancel_after(&self, handle: &JobHandle, timeout: Duration) {
        let handle = handle.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if !handle.is_finished() {
                        debug!(job_id = %handle.job_id, ?timeout, "Job timed out");
                        handle.cancel();
                    }
                }
                _ = handle.token.cancelled() => {}
            }
        });
    }

    fn spawn_job<A, T, F, C>(
        &self,
        job_type: &str,
        work: F,
        args: A,
        on_complete: C,
        on_progress: Option<ProgressCallback>,
    ) -> JobHandle
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(A, &JobContext) -> Result<T, JobError> + Send + 'static,
        C: FnOnce(JobOutcome<T>) + Send + 'static,
    {
        let job_type: Arc<str> = Arc::from(job_type);
        let job_id = self.guard.gen_job_id();
        self.guard.store_current_job_id(&job_type, job_id);

        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(JobState::Queued));
        lock(&self.in_flight).insert(
            job_id,
            InFlight {
                job_type: job_type.clone(),
                token: token.clone(),
            },
        );

        let handle = JobHandle {
            job_id,
            job_type: job_type.clone(),
            token: token.clone(),
            guard: self.guard.clone(),
            state: state.clone(),
        };

        let ctx = JobContext {
            job_id,
            job_type: job_type.clone(),
            token,
            guard: self.guard.clone(),
            post: self.post.clone(),
            on_progress,
        };

        debug!(job_id = %job_id, job_type = %job_type, "Job queued");

        let delivery = Delivery {
            guard: self.guard.clone(),
            in_flight: self.in_flight.clone(),
            job_type,
            job_id,
            state: state.clone(),
        };
        let permits = self.permits.clone();
        let post = self.post.clone();

        self.runtime.spawn(async move {
            let outcome = run_job(permits, work, args, ctx, &state).await;
            set_state(&state, JobState::Finished(outcome.kind()));
            post.post(Box::new(move || delivery.deliver(outcome, on_complete)));
        });

        handle
    }
}

/// Run the work on the blocking pool once a worker permit is available.
async fn run_job<A, T, F>(
    permits: Arc<Semaphore>,
    work: F,
    args: A,
    ctx: JobContext,
    state: &Mutex<JobState>,
) -> JobOutcome<T>
where
    A: Send + 'static,
    T: Send + 'static,
    F: FnOnce(A, &JobContext) -> Result<T, JobError> + Send + 'static,
{
    let Ok(_permit) = permits.acquire_owned().await else {
        return JobOutcome::Failed(JobError::PoolClosed);
    };

    if ctx.is_cancelled() {
        debug!(job_id = %ctx.job_id, "Job cancelled before run");
        return JobOutcome::Cancelled;
    }

    set_state(state, JobState::Running);
    let token = ctx.token.clone();

    match tokio::task::spawn_blocking(move || work(args, &ctx)).await {
        Ok(Ok(_)) if token.is_cancelled() => JobOutcome::Cancelled,
        Ok(Ok(value)) => JobOutcome::Completed(value),
        Ok(Err(JobError::Cancelled)) => JobOutcome::Cancelled,
        Ok(Err(err)) => JobOutcome::Failed(err),
        Err(join_err) if join_err.is_panic() => JobOutcome::Failed(JobError::Panicked(
            panic_message(join_err.into_panic()),
        )),
        Err(_) => JobOutcome::Failed(JobError::PoolClosed),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Everything the control thread needs to deliver one outcome.
struct Delivery {
    guard: Arc<JobGuard>,
    in_flight: InFlightMap,
    job_type: Arc<str>,
    job_id: JobId,
    state: Arc<Mutex<JobState>>,
}

impl Delivery {
    fn deliver<T, C>(self, outcome: JobOutcome<T>, on_complete: C)
    where
        C: FnOnce(JobOutcome<T>),
    {
        lock(&self.in_flight).remove(&self.job_id);
        let kind = outcome.kind();

        if !self.guard.is_current_job(&self.job_type, self.job_id) {
            debug!(
                job_id = %self.job_id,
                job_type = %self.job_type,
                outcome = ?kind,
                "Discarding stale job result"
            );
            set_state(&self.state, JobState::Delivered(kind, Disposition::Discarded));
            return;
        }

        if let JobOutcome::Failed(err) = &outcome {
            warn!(job_id = %self.job_id, job_type = %self.job_type, error = %err, "Job failed");
        } else {
            debug!(
                job_id = %self.job_id,
                job_type = %self.job_type,
                outcome = ?kind,
                "Applying job result"
            );
        }

        set_state(&self.state, JobState::Delivered(kind, Disposition::Applied));
        on_complete(outcome);
        self.guard.clear_job_id_if(&self.job_type, self.job_id);
    }
}

// =============================================================================
// Tests
// =============================================================================
