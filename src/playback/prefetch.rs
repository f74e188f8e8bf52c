//! Background block prefetcher for playback.
//!
//! Reads contiguous runs of frames from a [`FrameSource`] and keeps a
//! [`FrameRingBuffer`] topped up ahead of the playback cursor. Block reads
//! keep I/O sequential, which is what sustains high frame rates on
//! disk-backed stacks.
//!
//! ```text
//!   request_jump ──watch──►  prefetch task  ──read_block──►  FrameSource
//!                                  │
//!                                  └──push_block──►  FrameRingBuffer  ──pop──►  consumer
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ring::FrameRingBuffer;
use crate::error::SourceError;
use crate::view::{ImageFrame, PixelSource};

/// Default ring buffer capacity in frames
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Default frames per block read
pub const DEFAULT_PREFETCH_BLOCK_SIZE: usize = 8;

/// Default number of blocks kept ahead of the consumer
pub const DEFAULT_PREFETCH_MAX_INFLIGHT: usize = 4;

const IDLE_POLL: Duration = Duration::from_millis(10);
const FULL_POLL: Duration = Duration::from_millis(2);
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

// =============================================================================
// FrameSource Trait
// =============================================================================

/// Source of decoded playback frames.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Frame payload pushed into the ring.
    type Frame: Send + 'static;

    /// Number of timeline positions.
    fn frame_count(&self) -> u64;

    /// Read timeline indices `start..end` at depth `z`.
    ///
    /// May return fewer frames than requested; the prefetcher continues
    /// from the last frame returned.
    async fn read_block(&self, start: u64, end: u64, z: u32)
        -> Result<Vec<Self::Frame>, SourceError>;
}

/// Adapter exposing one image of a [`PixelSource`] as a [`FrameSource`].
///
/// Pixel reads are synchronous, so blocks are read on the blocking pool.
pub struct PixelFrameSource<P> {
    pixels: Arc<P>,
    image_id: u64,
}

impl<P: PixelSource> PixelFrameSource<P> {
    pub fn new(pixels: Arc<P>, image_id: u64) -> Self {
        Self { pixels, image_id }
    }
}

#[async_trait]
impl<P: PixelSource> FrameSource for PixelFrameSource<P> {
    type Frame = ImageFrame;

    fn frame_count(&self) -> u64 {
        self.pixels.frame_count(self.image_id).unwrap_or(0)
    }

    async fn read_block(
        &self,
        start: u64,
        end: u64,
        z: u32,
    ) -> Result<Vec<ImageFrame>, SourceError> {
        let pixels = self.pixels.clone();
        let image_id = self.image_id;
        tokio::task::spawn_blocking(move || {
            (start..end)
                .map(|t| pixels.frame(image_id, t, z))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| SourceError::Read(format!("block read task failed: {e}")))?
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Block sizing for the prefetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Frames per read
    pub block_size: usize,

    /// Blocks kept buffered ahead of the consumer
    pub max_inflight_blocks: usize,
}

impl PrefetchConfig {
    /// Both values are clamped to at least 1.
    pub fn new(block_size: usize, max_inflight_blocks: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            max_inflight_blocks: max_inflight_blocks.max(1),
        }
    }

    /// Frames the prefetcher aims to keep buffered in a ring of `capacity`.
    pub fn target_fill(&self, capacity: usize) -> usize {
        capacity.min(self.block_size.saturating_mul(self.max_inflight_blocks))
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFETCH_BLOCK_SIZE, DEFAULT_PREFETCH_MAX_INFLIGHT)
    }
}

// =============================================================================
// Block Prefetcher
// =============================================================================

/// Where the prefetch task should read next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    next: u64,

    /// Last valid timeline index (inclusive)
    t_max: u64,

    z: u32,
    looping: bool,
}

/// Keeps a ring buffer filled ahead of the playback position.
///
/// Frames are pushed with their timeline index as sequence number, so a
/// consumer can tell a wrap or a seek from a dropped frame.
pub struct BlockPrefetcher<S: FrameSource> {
    runtime: Handle,
    source: Arc<S>,
    ring: Arc<FrameRingBuffer<S::Frame>>,
    config: PrefetchConfig,
    jumps: watch::Sender<Option<Cursor>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S: FrameSource> BlockPrefetcher<S> {
    pub fn new(
        runtime: Handle,
        source: Arc<S>,
        ring: Arc<FrameRingBuffer<S::Frame>>,
        config: PrefetchConfig,
    ) -> Self {
        let (jumps, _) = watch::channel(None);
        Self {
            runtime,
            source,
            ring,
            config,
            jumps,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    pub fn ring(&self) -> &Arc<FrameRingBuffer<S::Frame>> {
        &self.ring
    }

    pub fn config(&self) -> PrefetchConfig {
        self.config
    }

    /// True while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start (or retarget) prefetching from the frame after `current_t`.
    ///
    /// `t_max` is the last timeline index to play, clamped to the source.
    pub fn start(&mut self, current_t: u64, t_max: u64, z: u32, looping: bool) {
        self.request_jump(current_t, t_max, z, looping);
        if self.is_running() {
            return;
        }

        self.shutdown = CancellationToken::new();
        let task = run_prefetch(
            self.source.clone(),
            self.ring.clone(),
            self.config,
            self.jumps.subscribe(),
            self.shutdown.clone(),
        );
        self.task = Some(self.runtime.spawn(task));
        info!(
            block_size = self.config.block_size,
            max_inflight_blocks = self.config.max_inflight_blocks,
            "Prefetcher started"
        );
    }

    /// Move the prefetch cursor to the frame after `current_t`.
    ///
    /// The ring is reset immediately; a block read already in flight is
    /// discarded rather than pushed.
    pub fn request_jump(&self, current_t: u64, t_max: u64, z: u32, looping: bool) {
        let frame_count = self.source.frame_count();
        let cursor = (frame_count > 0).then(|| Cursor {
            next: current_t.saturating_add(1),
            t_max: t_max.min(frame_count - 1),
            z,
            looping,
        });
        self.ring.reset();
        self.jumps.send_replace(cursor);
        debug!(current_t, t_max, z, looping, "Prefetch jump requested");
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Prefetch task ended abnormally");
            }
            info!("Prefetcher stopped");
        }
    }
}

impl<S: FrameSource> Drop for BlockPrefetcher<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_prefetch<S: FrameSource>(
    source: Arc<S>,
    ring: Arc<FrameRingBuffer<S::Frame>>,
    config: PrefetchConfig,
    mut jumps: watch::Receiver<Option<Cursor>>,
    shutdown: CancellationToken,
) {
    // A fresh receiver treats the current value as seen.
    let mut cursor: Option<Cursor> = *jumps.borrow_and_update();

    loop {
        if jumps.has_changed().unwrap_or(false) {
            cursor = *jumps.borrow_and_update();
            ring.reset();
        }

        let Some(mut cur) = cursor else {
            if !pause(&shutdown, IDLE_POLL).await {
                break;
            }
            continue;
        };

        let target = config.target_fill(ring.capacity());
        let filled = ring.len();
        if filled >= target {
            if !pause(&shutdown, FULL_POLL).await {
                break;
            }
            continue;
        }

        if cur.next > cur.t_max {
            if cur.looping {
                cur.next = 0;
            } else {
                debug!(t_max = cur.t_max, "Prefetch reached end of timeline");
                cursor = None;
                continue;
            }
        }

        let start = cur.next;
        let room = (target - filled).min(config.block_size) as u64;
        let end = start.saturating_add(room).min(cur.t_max + 1);

        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = source.read_block(start, end, cur.z) => read,
        };

        if jumps.has_changed().unwrap_or(false) {
            debug!(start, end, "Discarding block read across a jump");
            continue;
        }

        match read {
            Ok(frames) if frames.is_empty() => {
                warn!(start, end, "Frame source returned an empty block");
                if !pause(&shutdown, ERROR_BACKOFF).await {
                    break;
                }
            }
            Ok(frames) => {
                let read_count = frames.len() as u64;
                ring.push_block(start, frames);
                cur.next = start + read_count;
                if cur.looping && cur.next > cur.t_max {
                    cur.next = 0;
                }
                cursor = Some(cur);
            }
            Err(err) => {
                warn!(start, end, error = %err, "Prefetch read failed, retrying");
                if !pause(&shutdown, ERROR_BACKOFF).await {
                    break;
                }
            }
        }
    }

    debug!("Prefetch task exiting");
}

/// Sleep for `duration`; returns `false` if shutdown fired first.
async fn pause(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// =============================================================================
// Tests
// =============================================================================
