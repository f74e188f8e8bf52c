//! Stale-result guard.
//!
//! Maps a job-type tag to the id of the most recently submitted job of that
//! type. Any completion path asks [`JobGuard::is_current_job`] before it is
//! allowed to touch shared state, so a slow job that finishes after a newer
//! one of the same type can never overwrite the newer result.
//!
//! # Example
//!
//! ```
//! use viewcore::jobs::JobGuard;
//!
//! let guard = JobGuard::new();
//!
//! let first = guard.gen_job_id();
//! guard.store_current_job_id("render", first);
//! let second = guard.gen_job_id();
//! guard.store_current_job_id("render", second);
//!
//! // Whichever worker finishes first, only the second result counts.
//! assert!(!guard.is_current_job("render", first));
//! assert!(guard.is_current_job("render", second));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::sync::lock;

// =============================================================================
// Job Id
// =============================================================================

/// Source of every [`JobId`] in the process; ids start at 1.
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, totally ordered job identifier.
///
/// Ids come from one process-wide counter, so they are never reused and
/// never collide between guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

// =============================================================================
// Job Guard
// =============================================================================

/// Registry of the current job per job type.
///
/// All operations take one mutex for O(1) work. The guard is an ordinary
/// value: share it with `Arc<JobGuard>` and build as many independent
/// instances as needed.
#[derive(Debug, Default)]
pub struct JobGuard {
    /// Current job per job type
    current: Mutex<HashMap<String, JobId>>,
}

impl JobGuard {
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh id, unique for the lifetime of the process.
    pub fn gen_job_id(&self) -> JobId {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Publish `id` as current for `job_type`, replacing any previous value.
    pub fn store_current_job_id(&self, job_type: &str, id: JobId) {
        let mut current = lock(&self.current);
        current.insert(job_type.to_string(), id);
    }

    /// True iff `id` is the current job for `job_type`.
    ///
    /// An unknown job type is never current.
    pub fn is_current_job(&self, job_type: &str, id: JobId) -> bool {
        let current = lock(&self.current);
        current.get(job_type) == Some(&id)
    }

    /// Remove the entry for `job_type`, restoring "no active job".
    pub fn clear_job_id(&self, job_type: &str) {
        let mut current = lock(&self.current);
        current.remove(job_type);
    }

    /// Remove the entry for `job_type` only if it still points at `id`.
    ///
    /// Returns `true` if an entry was removed. A newer job's entry is left
    /// untouched.
    pub fn clear_job_id_if(&self, job_type: &str, id: JobId) -> bool {
        let mut current = lock(&self.current);
        if current.get(job_type) == Some(&id) {
            current.remove(job_type);
            true
        } else {
            false
        }
    }

    /// Current job for `job_type`, if any.
    pub fn current_job_id(&self, job_type: &str) -> Option<JobId> {
        lock(&self.current).get(job_type).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================
