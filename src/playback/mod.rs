//! Playback buffering.
//!
//! - [`FrameRingBuffer`]: fixed-capacity queue that decouples frame
//!   production from consumption; never blocks either side
//! - [`BlockPrefetcher`]: background task that fills the ring with
//!   contiguous block reads ahead of the playback cursor
//!
//! # Example
//!
//! ```ignore
//! let ring = Arc::new(FrameRingBuffer::new(64));
//! let mut prefetcher = BlockPrefetcher::new(Handle::current(), source, ring.clone(), PrefetchConfig::default());
//! prefetcher.start(current_t, t_max, z, true);
//!
//! // Playback timer tick
//! match ring.pop() {
//!     ReadResult::Ready(frame) => show(frame),
//!     ReadResult::NotReady => {} // underrun: keep the last frame on screen
//! }
//!
//! // User scrubbed
//! prefetcher.request_jump(new_t, t_max, z, true);
//! ```

mod prefetch;
mod ring;

pub use prefetch::{
    BlockPrefetcher, FrameSource, PixelFrameSource, PrefetchConfig, DEFAULT_PREFETCH_BLOCK_SIZE,
    DEFAULT_PREFETCH_MAX_INFLIGHT, DEFAULT_RING_CAPACITY,
};
pub use ring::{FrameRingBuffer, PushOutcome, ReadResult, RingStats, SequencedFrame};
