//! viewcore - simulated viewer sessions.
//!
//! This binary drives the library against an in-memory image stack so the
//! job pool, projection cache and prefetcher can be exercised and profiled
//! without a GUI.

use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use viewcore::{
    config::{Cli, Command, CoreConfig, PanArgs, PlaybackArgs},
    BlockPrefetcher, ControlQueue, CropRect, DownsampleFactor, FrameRingBuffer, ImageFrame,
    ImageShape, JobError, JobGuard, JobManager, MemorySource, PixelFrameSource, ProjectionCache,
    PyramidLevelSelector, ReadResult, SequencedFrame, ViewKind, ViewLookup, ViewRequest,
    ViewService, ViewSink, ViewState,
};

/// Image id of the simulated stack.
const IMAGE_ID: u64 = 1;

/// Upper bound on how long the pan session waits for outstanding renders.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Display interval of the simulated playback clock.
const FRAME_INTERVAL: Duration = Duration::from_millis(5);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.command.core().verbose);

    if let Err(e) = cli.command.core().validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    log_config(cli.command.core());

    match cli.command {
        Command::Pan(args) => run_pan(args).await,
        Command::Playback(args) => run_playback(args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "viewcore=debug"
    } else {
        "viewcore=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_config(config: &CoreConfig) {
    info!("Configuration:");
    info!("  Workers: {}", config.workers);
    info!(
        "  Cache: {} MiB ({:.0}% pyramid)",
        config.cache_budget_mb,
        config.pyramid_share * 100.0
    );
    info!(
        "  Playback: ring {} frames, blocks of {} x {}",
        config.ring_capacity, config.prefetch_block_size, config.prefetch_max_inflight
    );
    match config.render_timeout() {
        Some(timeout) => info!("  Render timeout: {:?}", timeout),
        None => info!("  Render timeout: none"),
    }
}

/// Build the in-memory stack both sessions play against.
fn simulated_source(image_size: u32, frames: u64) -> MemorySource {
    let source = MemorySource::new();
    source.insert_with(
        IMAGE_ID,
        ImageShape::new(image_size, image_size),
        frames,
        1,
        |t, _, y, x| ((u64::from(x) + u64::from(y) + t * 7) % 256) as f32,
    );
    source
}

/// Print a serializable snapshot as pretty JSON.
fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize report: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Pan Command
// =============================================================================

/// Counts repaints requested by the view pipeline.
#[derive(Default)]
struct RepaintCounter {
    ready: AtomicUsize,
    failed: AtomicUsize,
}

impl ViewSink for RepaintCounter {
    fn view_ready(&self, request: &ViewRequest, frame: &ImageFrame) {
        self.ready.fetch_add(1, Ordering::Relaxed);
        debug!(
            kind = %request.kind,
            t = request.t,
            height = frame.height(),
            width = frame.width(),
            "Repaint"
        );
    }

    fn view_failed(&self, request: &ViewRequest, error: &JobError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(kind = %request.kind, t = request.t, error = %error, "Render failed");
    }
}

async fn run_pan(args: PanArgs) -> ExitCode {
    let config = &args.core;
    let size = args.image_size.max(2);
    let shape = ImageShape::new(size, size);
    let source = Arc::new(simulated_source(size, args.frames.max(1)));

    let cache = Arc::new(ProjectionCache::with_pyramid_share(
        config.cache_budget_bytes(),
        config.pyramid_share,
    ));
    cache.set_warning_callback(|warning| info!(percent = warning.percent, "Cache pressure"));

    let mut control = ControlQueue::new();
    let jobs = JobManager::new(
        tokio::runtime::Handle::current(),
        config.workers,
        Arc::new(JobGuard::new()),
        control.poster(),
    );
    let sink = Arc::new(RepaintCounter::default());
    let mut service = ViewService::new(source, cache.clone(), jobs, sink.clone());
    if let Some(timeout) = config.render_timeout() {
        service = service.with_render_timeout(timeout);
    }

    let mut selector = PyramidLevelSelector::default();
    let mut immediate = 0usize;
    let half = f64::from(size) / 2.0;
    let steps = args.steps.max(1);

    info!("");
    info!("Simulating {} pan steps over a {}x{} stack", steps, size, size);

    // Walk the crop diagonally while cycling zoom, then walk back so the
    // return trip is served from the cache.
    let path: Vec<u32> = (0..steps).chain((0..steps).rev()).collect();
    for (i, &step) in path.iter().enumerate() {
        let offset = half * f64::from(step) / f64::from(steps);
        let ds = f64::from(1u32 << (step % 3));
        let view = ViewState::new(
            CropRect::new(offset, offset, half, half),
            DownsampleFactor::saturating(ds),
        );
        let level = selector.select(1.0 / ds);

        let t = u64::from(step) % args.frames.max(1);
        let mut requests = vec![ViewRequest::frame(IMAGE_ID, t, 0, view)];
        if step % 4 == 0 {
            requests.push(ViewRequest::projection(IMAGE_ID, ViewKind::Mean, 0, view));
        }

        for request in requests {
            match service.request_view(request) {
                Ok(ViewLookup::Ready(_)) => immediate += 1,
                Ok(ViewLookup::Pending(handle)) => {
                    debug!(step = i, job_id = %handle.job_id(), level, "Render submitted");
                }
                Err(e) => warn!(step = i, error = %e, "View request rejected"),
            }
        }

        // One event-loop turn per step.
        control.drain();
        tokio::task::yield_now().await;
    }

    let settled = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while service.jobs().in_flight() > 0 {
            control.run_next().await;
        }
    })
    .await;
    if settled.is_err() {
        warn!("Renders still outstanding after {:?}", SETTLE_TIMEOUT);
    }

    let report = serde_json::json!({
        "image": { "height": shape.height, "width": shape.width, "frames": args.frames },
        "steps": path.len(),
        "served_from_cache": immediate,
        "repaints": sink.ready.load(Ordering::Relaxed),
        "failures": sink.failed.load(Ordering::Relaxed),
        "telemetry": cache.telemetry(),
        "stats": cache.stats(),
    });
    print_json(&report)
}

// =============================================================================
// Playback Command
// =============================================================================

async fn run_playback(args: PlaybackArgs) -> ExitCode {
    let config = &args.core;
    let size = args.image_size.max(1);
    let frames = args.frames.max(1);
    let pixels = Arc::new(simulated_source(size, frames));

    let ring = Arc::new(FrameRingBuffer::new(config.ring_capacity));
    let mut prefetcher = BlockPrefetcher::new(
        tokio::runtime::Handle::current(),
        Arc::new(PixelFrameSource::new(pixels, IMAGE_ID)),
        ring.clone(),
        config.prefetch_config(),
    );

    info!("");
    info!(
        "Playing {} frames of a {}-frame stack (looping: {})",
        args.play, frames, args.looping
    );

    // Frame 0 is on screen; prefetch from frame 1.
    prefetcher.start(0, frames - 1, 0, args.looping);

    let mut clock = tokio::time::interval(FRAME_INTERVAL);
    let mut last: Option<SequencedFrame<ImageFrame>> = None;
    let mut played = 0u64;
    let mut discontinuities = 0u64;
    let mut jumped = false;
    let max_ticks = args.play.saturating_mul(50).max(100);

    for _ in 0..max_ticks {
        if played >= args.play {
            break;
        }
        clock.tick().await;

        // Seek to the middle of the timeline once, halfway through.
        if !jumped && played >= args.play / 2 && frames > 2 {
            jumped = true;
            info!(target_t = frames / 2, "Seeking");
            prefetcher.request_jump(frames / 2, frames - 1, 0, args.looping);
            last = None;
            continue;
        }

        match ring.pop() {
            ReadResult::Ready(frame) => {
                if let Some(prev) = &last {
                    if !frame.follows(prev) {
                        discontinuities += 1;
                        debug!(prev = prev.sequence, next = frame.sequence, "Discontinuity");
                    }
                }
                played += 1;
                last = Some(frame);
            }
            ReadResult::NotReady => {
                let at_end = last.as_ref().is_some_and(|f| f.sequence + 1 >= frames);
                if !args.looping && at_end {
                    info!("Reached end of timeline");
                    break;
                }
            }
        }
    }

    prefetcher.stop().await;

    let report = serde_json::json!({
        "played": played,
        "discontinuities": discontinuities,
        "last_sequence": last.map(|f| f.sequence),
        "ring": ring.stats(),
        "fill_level": ring.fill_level(),
    });
    print_json(&report)
}
