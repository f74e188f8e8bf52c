//! View service for orchestrating derived-view rendering.
//!
//! The ViewService is the entry point for every view-state change. It
//! orchestrates:
//! - Cache key derivation from the view snapshot
//! - Cache lookups
//! - Background rendering through the job manager
//! - Result caching and repaint notification on the control thread
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ViewService                             │
//! │  request_view()                                                  │
//! │    1. Clip crop, pick level    3. Miss: submit render job        │
//! │    2. Check cache              4. Control thread: put + repaint  │
//! │           │                           │                 │        │
//! │           ▼                           ▼                 ▼        │
//! │  ┌─────────────────┐       ┌──────────────────┐  ┌────────────┐  │
//! │  │ ProjectionCache │       │    JobManager    │  │  ViewSink  │  │
//! │  └─────────────────┘       └────────┬─────────┘  └────────────┘  │
//! └─────────────────────────────────────┼────────────────────────────┘
//!                                       ▼
//!                               ┌──────────────┐
//!                               │ PixelSource  │
//!                               └──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheKey, ProjectionCache, ViewKind, ViewParams};
use crate::coords::{PixelWindow, Rect, ViewState};
use crate::error::{JobError, SourceError, ViewError};
use crate::jobs::{JobContext, JobHandle, JobManager, JobOutcome};

use super::frame::ImageFrame;
use super::pyramid::{
    downsample_mean_pool, level_for_downsample, pyramid_level_factor, DEFAULT_MAX_PYRAMID_LEVEL,
};
use super::source::PixelSource;

// =============================================================================
// View Request
// =============================================================================

/// A request for one derived view under one view-state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRequest {
    pub image_id: u64,

    pub kind: ViewKind,

    /// Timeline index; ignored by projections
    pub t: u64,

    pub z: u32,

    /// Display channel, part of the cache identity
    pub channel: u32,

    pub view: ViewState,
}

impl ViewRequest {
    /// Request a single plane.
    pub fn frame(image_id: u64, t: u64, z: u32, view: ViewState) -> Self {
        Self {
            image_id,
            kind: ViewKind::Frame,
            t,
            z,
            channel: 0,
            view,
        }
    }

    /// Request a projection over the time axis.
    pub fn projection(image_id: u64, kind: ViewKind, z: u32, view: ViewState) -> Self {
        Self {
            image_id,
            kind,
            t: 0,
            z,
            channel: 0,
            view,
        }
    }

    /// Job type shared by every render of this image and kind.
    pub fn job_type(&self) -> String {
        format!("render:{}:{}", self.image_id, self.kind)
    }
}

/// Result of [`ViewService::request_view`].
#[derive(Debug)]
pub enum ViewLookup {
    /// Cache hit, ready to draw
    Ready(ImageFrame),

    /// Render submitted; the sink is notified when it lands
    Pending(JobHandle),
}

// =============================================================================
// View Sink
// =============================================================================

/// Receives render results on the control thread.
pub trait ViewSink: Send + Sync + 'static {
    /// A fresh view should be drawn. It is cached unless it exceeds its
    /// pool budget.
    fn view_ready(&self, request: &ViewRequest, frame: &ImageFrame);

    /// The current render for `request` failed.
    fn view_failed(&self, request: &ViewRequest, error: &JobError);
}

// =============================================================================
// View Service
// =============================================================================

/// Service for rendering and caching derived views.
///
/// # Type Parameters
///
/// * `S` - The pixel source
///
/// # Example
///
/// ```ignore
/// let service = ViewService::new(source, cache, jobs, sink);
///
/// match service.request_view(ViewRequest::frame(1, t, 0, view))? {
///     ViewLookup::Ready(frame) => draw(&frame),
///     ViewLookup::Pending(_) => {} // sink.view_ready() fires later
/// }
/// ```
pub struct ViewService<S: PixelSource> {
    source: Arc<S>,
    cache: Arc<ProjectionCache<ImageFrame>>,
    jobs: JobManager,
    sink: Arc<dyn ViewSink>,
    render_timeout: Option<Duration>,
    max_pyramid_level: u32,
}

impl<S: PixelSource> ViewService<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<ProjectionCache<ImageFrame>>,
        jobs: JobManager,
        sink: Arc<dyn ViewSink>,
    ) -> Self {
        Self {
            source,
            cache,
            jobs,
            sink,
            render_timeout: None,
            max_pyramid_level: DEFAULT_MAX_PYRAMID_LEVEL,
        }
    }

    /// Cancel any render still running after `timeout`.
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = Some(timeout);
        self
    }

    /// Deepest pyramid level used for downsampled views.
    pub fn with_max_pyramid_level(mut self, level: u32) -> Self {
        self.max_pyramid_level = level;
        self
    }

    pub fn cache(&self) -> &Arc<ProjectionCache<ImageFrame>> {
        &self.cache
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Cache key for `request` after clipping its crop to the image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is unknown or the crop misses it.
    pub fn cache_key(&self, request: &ViewRequest) -> Result<CacheKey, ViewError> {
        let shape = self.source.shape(request.image_id)?;
        let clipped = request.view.clipped_to(shape);
        if clipped.crop.is_empty() {
            return Err(ViewError::EmptyWindow);
        }

        let params = ViewParams {
            level: level_for_downsample(clipped.downsample.get(), self.max_pyramid_level),
            channel: request.channel,
            t: if request.kind.is_projection() { 0 } else { request.t },
            z: request.z,
            window: clipped.crop.to_pixel_window(),
        };
        Ok(CacheKey::new(request.image_id, request.kind, params))
    }

    /// Return the cached view or start rendering it.
    ///
    /// A new render supersedes any render of the same image and kind still
    /// in flight; only the newest one reaches the cache and the sink.
    pub fn request_view(&self, request: ViewRequest) -> Result<ViewLookup, ViewError> {
        let key = self.cache_key(&request)?;
        if let Some(frame) = self.cache.get(&key) {
            return Ok(ViewLookup::Ready(frame));
        }

        let job_type = request.job_type();
        let source = self.source.clone();
        let cache = self.cache.clone();
        let sink = self.sink.clone();
        let delivered = request.clone();

        let handle = self.jobs.submit(
            &job_type,
            move |(request, key): (ViewRequest, CacheKey), ctx: &JobContext| {
                render_view(source.as_ref(), &request, &key, ctx).map_err(JobError::from)
            },
            (request, key.clone()),
            move |outcome| match outcome {
                JobOutcome::Completed(frame) => {
                    let outcome = cache.put(key, frame.clone(), frame.nbytes());
                    if !outcome.is_stored() {
                        debug!(
                            image_id = delivered.image_id,
                            kind = %delivered.kind,
                            ?outcome,
                            "Rendered view not cached, drawing it anyway"
                        );
                    }
                    sink.view_ready(&delivered, &frame);
                }
                JobOutcome::Failed(err) => sink.view_failed(&delivered, &err),
                JobOutcome::Cancelled => {
                    debug!(
                        image_id = delivered.image_id,
                        kind = %delivered.kind,
                        "Render cancelled"
                    );
                }
            },
        );

        if let Some(timeout) = self.render_timeout {
            self.jobs.cancel_after(&handle, timeout);
        }
        Ok(ViewLookup::Pending(handle))
    }

    /// Map a view-surface click to full-resolution `(y, x)`.
    ///
    /// Returns `None` when the point falls outside the image.
    pub fn map_click(
        &self,
        request: &ViewRequest,
        x_canvas: f64,
        y_canvas: f64,
    ) -> Result<Option<(f64, f64)>, ViewError> {
        let shape = self.source.shape(request.image_id)?;
        let (y, x) = request.view.canvas_to_full(x_canvas, y_canvas);
        Ok(Rect::full(shape).contains(y, x).then_some((y, x)))
    }

    /// Project full-resolution overlay geometry into display space.
    pub fn overlay_rect(&self, request: &ViewRequest, roi: Rect) -> Rect {
        request.view.project_roi(roi)
    }

    /// Drop every cached view of an image, e.g. after its pixels changed.
    pub fn invalidate_image(&self, image_id: u64) -> usize {
        self.cache.invalidate_image(image_id)
    }

    /// Cancel all renders and empty the cache.
    pub fn reset(&self) {
        self.jobs.cancel_all();
        self.cache.clear();
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Compute one view on a worker thread.
fn render_view<S: PixelSource + ?Sized>(
    source: &S,
    request: &ViewRequest,
    key: &CacheKey,
    ctx: &JobContext,
) -> Result<ImageFrame, ViewError> {
    let window = key.params.window;
    let full = match request.kind {
        ViewKind::Frame => {
            checkpoint(ctx)?;
            source
                .frame(request.image_id, request.t, request.z)?
                .crop(window)
                .ok_or(ViewError::EmptyWindow)?
        }
        kind => project(source, request.image_id, kind, request.z, window, ctx)?,
    };

    checkpoint(ctx)?;
    Ok(downsample_mean_pool(
        &full,
        pyramid_level_factor(key.params.level),
    ))
}

/// Reduce the time axis at fixed `z` inside `window`.
fn project<S: PixelSource + ?Sized>(
    source: &S,
    image_id: u64,
    kind: ViewKind,
    z: u32,
    window: PixelWindow,
    ctx: &JobContext,
) -> Result<ImageFrame, ViewError> {
    let frames = source.frame_count(image_id)?;
    if frames == 0 {
        return Err(ViewError::Source(SourceError::FrameOutOfRange {
            t: 0,
            z,
            frames,
        }));
    }

    let mut shape = None;
    let mut sum: Vec<f64> = Vec::new();
    let mut sum_sq: Vec<f64> = Vec::new();
    let mut max: Vec<f32> = Vec::new();

    for t in 0..frames {
        checkpoint(ctx)?;
        let plane = source
            .frame(image_id, t, z)?
            .crop(window)
            .ok_or(ViewError::EmptyWindow)?;

        if shape.is_none() {
            let n = plane.as_slice().len();
            shape = Some(plane.shape());
            sum = vec![0.0; n];
            sum_sq = vec![0.0; n];
            max = vec![f32::NEG_INFINITY; n];
        }

        for (i, &v) in plane.as_slice().iter().enumerate() {
            let v64 = f64::from(v);
            sum[i] += v64;
            sum_sq[i] += v64 * v64;
            if v > max[i] {
                max[i] = v;
            }
        }
        ctx.report_progress(((t + 1) * 100 / frames) as i64, "projecting");
    }

    let shape = shape.ok_or(ViewError::EmptyWindow)?;
    let n = frames as f64;
    let data: Vec<f32> = match kind {
        ViewKind::Max => max,
        ViewKind::Std => sum
            .iter()
            .zip(&sum_sq)
            .map(|(s, sq)| {
                let mean = s / n;
                (sq / n - mean * mean).max(0.0).sqrt() as f32
            })
            .collect(),
        _ => sum.iter().map(|s| (s / n) as f32).collect(),
    };

    ImageFrame::from_vec(shape, data).ok_or(ViewError::EmptyWindow)
}

fn checkpoint(ctx: &JobContext) -> Result<(), ViewError> {
    ctx.checkpoint().map_err(|_| ViewError::Cancelled)
}

// =============================================================================
// Tests
// =============================================================================
