//! Playback integration tests.
//!
//! Tests verify:
//! - The prefetcher feeds the ring with contiguous, correct frames
//! - Looping playback wraps and the wrap is visible as a discontinuity
//! - Seeking discards buffered frames and resumes after the new position

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use viewcore::{
    BlockPrefetcher, FrameRingBuffer, ImageFrame, PixelFrameSource, PrefetchConfig, ReadResult,
    SequencedFrame,
};

use super::test_utils::{InstrumentedSource, IMAGE_ID, WAIT};

type Prefetcher = BlockPrefetcher<PixelFrameSource<InstrumentedSource>>;

fn prefetcher(frames: u64, capacity: usize, config: PrefetchConfig) -> Prefetcher {
    let source = Arc::new(InstrumentedSource::ramp(4, 4, frames));
    BlockPrefetcher::new(
        Handle::current(),
        Arc::new(PixelFrameSource::new(source, IMAGE_ID)),
        Arc::new(FrameRingBuffer::new(capacity)),
        config,
    )
}

/// Pop the next frame, polling until one arrives.
async fn next_frame(ring: &FrameRingBuffer<ImageFrame>) -> SequencedFrame<ImageFrame> {
    tokio::time::timeout(WAIT, async {
        loop {
            if let ReadResult::Ready(frame) = ring.pop() {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("no frame arrived")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plays_through_in_order() {
    let mut prefetcher = prefetcher(20, 8, PrefetchConfig::new(4, 2));
    let ring = prefetcher.ring().clone();
    prefetcher.start(0, 19, 0, false);

    let mut prev = next_frame(&ring).await;
    assert_eq!(prev.sequence, 1);
    for _ in 2..20 {
        let frame = next_frame(&ring).await;
        assert!(frame.follows(&prev), "{} after {}", frame.sequence, prev.sequence);
        // Pixel (0, 0) carries the timeline index.
        assert_eq!(frame.frame.get(0, 0), Some(frame.sequence as f32 * 1000.0));
        prev = frame;
    }
    assert_eq!(prev.sequence, 19);

    // Nothing past the end of the timeline.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(ring.is_empty());

    prefetcher.stop().await;
    assert!(!prefetcher.is_running());
    let stats = ring.stats();
    assert_eq!(stats.popped, 19);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_looping_wraps_to_first_frame() {
    let mut prefetcher = prefetcher(5, 4, PrefetchConfig::new(2, 2));
    let ring = prefetcher.ring().clone();
    prefetcher.start(0, 4, 0, true);

    let mut sequences = Vec::new();
    for _ in 0..12 {
        sequences.push(next_frame(&ring).await.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2]);

    // Wraps are the only discontinuities.
    let gaps = sequences
        .windows(2)
        .filter(|pair| pair[0] + 1 != pair[1])
        .count();
    assert_eq!(gaps, 2);

    prefetcher.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_seek_resumes_after_new_position() {
    let mut prefetcher = prefetcher(40, 8, PrefetchConfig::new(4, 2));
    let ring = prefetcher.ring().clone();
    prefetcher.start(0, 39, 0, false);

    for expected in 1..=10 {
        assert_eq!(next_frame(&ring).await.sequence, expected);
    }

    prefetcher.request_jump(2, 39, 0, false);

    // A block read in flight across the seek may land briefly; everything
    // from the new position on is contiguous.
    let mut frame = next_frame(&ring).await;
    while frame.sequence != 3 {
        assert!(frame.sequence > 10, "unexpected frame {}", frame.sequence);
        frame = next_frame(&ring).await;
    }
    for _ in 0..6 {
        let next = next_frame(&ring).await;
        assert!(next.follows(&frame));
        frame = next;
    }

    prefetcher.stop().await;
}
