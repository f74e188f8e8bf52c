//! Background job execution with stale-result protection.
//!
//! # Architecture
//!
//! ```text
//!  control thread                         worker pool (N permits)
//! ┌──────────────────────┐  submit   ┌──────────────────────────┐
//! │  JobManager::submit  │──────────►│  work(args, &JobContext) │
//! │    └─ JobGuard       │           └────────────┬─────────────┘
//! │       (new current)  │                        │ post
//! │                      │  drain    ┌────────────▼─────────────┐
//! │  continuation ◄──────│◄──────────│       ControlQueue        │
//! │  (if still current)  │           └──────────────────────────┘
//! └──────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`JobGuard`]: registry of the current job id per job type
//! - [`ControlQueue`] / [`ControlPoster`]: the "post to control thread" channel
//! - [`JobManager`]: bounded pool, cancellation, delivery
//! - [`JobHandle`] / [`JobContext`]: the submitter's and the worker's view of a job

mod control;
mod guard;
mod manager;

pub use control::{ControlPost, ControlPoster, ControlQueue, ControlTask};
pub use guard::{JobGuard, JobId};
pub use manager::{
    Disposition, JobContext, JobHandle, JobManager, JobOutcome, JobProgress, JobState, OutcomeKind,
};
