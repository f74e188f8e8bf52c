use thiserror::Error;

/// Errors a background job can finish with.
///
/// A job that fails is only ever surfaced to its continuation while it is
/// still the current job of its type; stale failures are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job observed its cancellation token and stopped early
    #[error("Job cancelled")]
    Cancelled,

    /// The work closure returned an error
    #[error("Job failed: {0}")]
    Failed(String),

    /// The work closure panicked; the panic was caught at the pool boundary
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// The worker pool was shut down before the job could run
    #[error("Worker pool is closed")]
    PoolClosed,
}

impl JobError {
    /// Wrap any displayable error as a job failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        JobError::Failed(err.to_string())
    }
}

/// Errors raised by a pixel or frame source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// No image is registered under this id
    #[error("Image not found: {0}")]
    ImageNotFound(u64),

    /// Requested timeline or depth index is outside the image
    #[error("Frame out of range: t={t}, z={z} (image has {frames} frames)")]
    FrameOutOfRange { t: u64, z: u32, frames: u64 },

    /// Backend read failure
    #[error("Read error: {0}")]
    Read(String),
}

/// Errors that can occur while computing a derived view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// Error from the pixel source
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The crop window does not intersect the image
    #[error("Crop window does not intersect the image")]
    EmptyWindow,

    /// The render job was cancelled at a checkpoint
    #[error("Render cancelled")]
    Cancelled,
}

impl From<ViewError> for JobError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::Cancelled => JobError::Cancelled,
            other => JobError::Failed(other.to_string()),
        }
    }
}
