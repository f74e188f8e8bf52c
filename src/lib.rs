//! # viewcore
//!
//! Rendering-concurrency and cache-consistency core for interactive image
//! viewers.
//!
//! A viewer that pans, zooms and scrubs through large multi-dimensional
//! stacks cannot afford to compute derived views on its control thread, and
//! it cannot afford to show a result that was computed for a view the user
//! has already left. This library provides the pieces that keep both
//! promises.
//!
//! ## Features
//!
//! - **Stale-result guarding**: only the newest job of each type may apply its result
//! - **Bounded worker pool**: renders run off the control thread, results come back on it
//! - **Memory-budgeted cache**: LRU projection cache with separate pyramid and full-resolution pools
//! - **Playback buffering**: bounded ring buffer fed by a block prefetcher
//! - **Coordinate mapping**: canvas, display, crop and full-resolution spaces
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`coords`] - Coordinate transforms and the view-state snapshot
//! - [`jobs`] - Job guard, control-thread queue and job manager
//! - [`cache`] - Projection cache, keys and telemetry
//! - [`playback`] - Frame ring buffer and block prefetcher
//! - [`view`] - Frames, pyramid helpers and the view pipeline
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use viewcore::{
//!     ControlQueue, ImageShape, JobGuard, JobManager, MemorySource, ProjectionCache,
//!     ViewRequest, ViewService, ViewSink, ViewState,
//! };
//!
//! struct Repaint;
//!
//! impl ViewSink for Repaint {
//!     fn view_ready(&self, _: &ViewRequest, _: &viewcore::ImageFrame) {}
//!     fn view_failed(&self, _: &ViewRequest, _: &viewcore::JobError) {}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = MemorySource::new();
//!     source.insert_with(1, ImageShape::new(256, 256), 10, 1, |t, _, y, x| (t + u64::from(y ^ x)) as f32);
//!
//!     let mut control = ControlQueue::new();
//!     let jobs = JobManager::new(
//!         tokio::runtime::Handle::current(),
//!         4,
//!         Arc::new(JobGuard::new()),
//!         control.poster(),
//!     );
//!     let service = ViewService::new(
//!         Arc::new(source),
//!         Arc::new(ProjectionCache::new(64 * 1024 * 1024)),
//!         jobs,
//!         Arc::new(Repaint),
//!     );
//!
//!     let view = ViewState::full_image(ImageShape::new(256, 256));
//!     service.request_view(ViewRequest::frame(1, 0, 0, view)).unwrap();
//!
//!     // The control loop applies finished renders.
//!     control.run_next().await;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coords;
pub mod error;
pub mod jobs;
pub mod playback;
pub mod view;

mod sync;

// Re-export commonly used types
pub use cache::{
    BudgetWarning, CacheBudget, CacheKey, CacheStats, CacheTelemetry, Pool, ProjectionCache,
    PutOutcome, ViewKind, ViewParams, DEFAULT_CACHE_BUDGET, DEFAULT_PYRAMID_SHARE,
};
pub use config::{Cli, Command, CoreConfig, PanArgs, PlaybackArgs};
pub use coords::{
    canvas_to_display, crop_rect_intersection, crop_to_full, display_to_canvas, display_to_full,
    full_to_crop, full_to_display, roi_rect_in_display_coords, CropRect, DownsampleFactor,
    ImageShape, PixelWindow, Rect, ViewState,
};
pub use error::{JobError, SourceError, ViewError};
pub use jobs::{
    ControlPost, ControlPoster, ControlQueue, ControlTask, Disposition, JobContext, JobGuard,
    JobHandle, JobId, JobManager, JobOutcome, JobProgress, JobState, OutcomeKind,
};
pub use playback::{
    BlockPrefetcher, FrameRingBuffer, FrameSource, PixelFrameSource, PrefetchConfig, PushOutcome,
    ReadResult, RingStats, SequencedFrame, DEFAULT_PREFETCH_BLOCK_SIZE,
    DEFAULT_PREFETCH_MAX_INFLIGHT, DEFAULT_RING_CAPACITY,
};
pub use view::{
    downsample_mean_pool, level_for_downsample, pyramid_level_factor, ImageFrame, MemorySource,
    PixelSource, PyramidLevelSelector, ViewLookup, ViewRequest, ViewService, ViewSink,
    DEFAULT_MAX_PYRAMID_LEVEL,
};
