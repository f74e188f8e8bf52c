//! View pipeline integration tests.
//!
//! Tests verify:
//! - Rapid view changes apply only the newest render
//! - Renders of different kinds do not supersede each other
//! - Render timeouts cancel cooperatively and leave no trace
//! - Cache budget is enforced across renders
//! - Click mapping agrees with the rendered pixels

use std::time::Duration;

use viewcore::{
    CropRect, Disposition, DownsampleFactor, ImageShape, JobError, JobState, OutcomeKind, Rect,
    ViewKind, ViewLookup, ViewRequest, ViewState,
};

use super::test_utils::{Harness, InstrumentedSource, IMAGE_ID, WAIT};

const MIB: usize = 1024 * 1024;

fn full_view() -> ViewState {
    ViewState::full_image(ImageShape::new(8, 8))
}

fn frame_request(t: u64) -> ViewRequest {
    ViewRequest::frame(IMAGE_ID, t, 0, full_view())
}

// =============================================================================
// Supersession
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scrub_storm_applies_only_newest() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 4), 2, MIB);
    let (entered, release) = h.source.gate();

    h.service.request_view(frame_request(0)).unwrap();
    // The first render is now reading inside the source.
    assert_eq!(entered.recv_timeout(WAIT).unwrap(), 0);

    h.service.request_view(frame_request(1)).unwrap();
    h.service.request_view(frame_request(2)).unwrap();
    for _ in 0..3 {
        release.send(()).unwrap();
    }
    h.settle().await;

    assert_eq!(h.sink.ready_ts(), vec![2]);
    assert_eq!(h.source.reads(), 3);

    let cache = h.service.cache();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&h.service.cache_key(&frame_request(2)).unwrap()));
    assert!(!cache.contains(&h.service.cache_key(&frame_request(0)).unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_failure_is_silent() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 4), 2, MIB);

    // Out of range, but superseded before it can be delivered.
    h.service.request_view(frame_request(99)).unwrap();
    h.service.request_view(frame_request(1)).unwrap();
    h.settle().await;

    assert_eq!(h.sink.failed_count(), 0);
    assert_eq!(h.sink.ready_ts(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_current_failure_reaches_sink() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 4), 2, MIB);

    h.service.request_view(frame_request(99)).unwrap();
    h.settle().await;

    let failed = h.sink.failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0.t, 99);
    assert!(matches!(failed[0].1, JobError::Failed(_)));
    assert!(h.service.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kinds_render_independently() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 4), 2, MIB);

    h.service.request_view(frame_request(3)).unwrap();
    h.service
        .request_view(ViewRequest::projection(IMAGE_ID, ViewKind::Max, 0, full_view()))
        .unwrap();
    h.settle().await;

    let ready = h.sink.ready.lock().unwrap();
    assert_eq!(ready.len(), 2);
    let max = ready
        .iter()
        .find(|(r, _)| r.kind == ViewKind::Max)
        .map(|(_, f)| f.clone())
        .unwrap();
    // Max over t of t * 1000 + 9 at pixel (1, 1)
    assert_eq!(max.get(1, 1), Some(3009.0));

    let stats = h.service.cache().stats();
    assert_eq!(stats.full_entries, 2);
    assert_eq!(stats.pyramid_entries, 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_render_timeout_cancels_projection() {
    let source = InstrumentedSource::ramp(8, 8, 20).with_delay(Duration::from_millis(20));
    let mut h = Harness::new(source, 2, MIB);
    h.service = h.service.with_render_timeout(Duration::from_millis(50));

    let lookup = h
        .service
        .request_view(ViewRequest::projection(IMAGE_ID, ViewKind::Mean, 0, full_view()))
        .unwrap();
    let ViewLookup::Pending(handle) = lookup else {
        panic!("expected a pending render");
    };
    h.settle().await;

    assert_eq!(
        handle.state(),
        JobState::Delivered(OutcomeKind::Cancelled, Disposition::Discarded)
    );
    assert!(h.source.reads() < 20);
    assert_eq!(h.sink.ready_count(), 0);
    assert_eq!(h.sink.failed_count(), 0);
    assert!(h.service.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_discards_running_render() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 4), 1, MIB);
    let (entered, release) = h.source.gate();

    h.service.request_view(frame_request(0)).unwrap();
    entered.recv_timeout(WAIT).unwrap();
    h.service.reset();
    release.send(()).unwrap();
    h.settle().await;

    assert_eq!(h.sink.ready_count(), 0);
    assert!(h.service.cache().is_empty());

    // The pipeline keeps working after a reset.
    h.source.open();
    h.service.request_view(frame_request(1)).unwrap();
    h.settle().await;
    assert_eq!(h.sink.ready_ts(), vec![1]);
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_budget_across_renders() {
    // 8x8 f32 frames are 256 bytes; the full pool gets 750 of 1000 bytes.
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 5), 2, 1000);

    for t in 0..5 {
        h.service.request_view(frame_request(t)).unwrap();
        h.settle().await;
    }

    let cache = h.service.cache();
    assert_eq!(cache.len(), 2);
    assert!(cache.used_bytes() <= 750);
    let telemetry = cache.telemetry();
    assert_eq!(telemetry.eviction_count, 3);
    assert_eq!(telemetry.bytes_evicted, 3 * 256);

    // Most recent render is a hit; the oldest has to be rendered again.
    assert!(matches!(
        h.service.request_view(frame_request(4)).unwrap(),
        ViewLookup::Ready(_)
    ));
    let reads = h.source.reads();
    assert!(matches!(
        h.service.request_view(frame_request(0)).unwrap(),
        ViewLookup::Pending(_)
    ));
    h.settle().await;
    assert_eq!(h.source.reads(), reads + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalidate_forces_rerender() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 2), 2, MIB);

    h.service.request_view(frame_request(0)).unwrap();
    h.settle().await;
    assert!(matches!(
        h.service.request_view(frame_request(0)).unwrap(),
        ViewLookup::Ready(_)
    ));

    assert_eq!(h.service.invalidate_image(IMAGE_ID), 1);
    assert!(matches!(
        h.service.request_view(frame_request(0)).unwrap(),
        ViewLookup::Pending(_)
    ));
    h.settle().await;
    assert_eq!(h.source.reads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zoomed_views_land_in_pyramid_pool() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 1), 2, MIB);
    let zoomed = ViewState::new(
        CropRect::new(0.0, 0.0, 8.0, 8.0),
        DownsampleFactor::new(4.0).unwrap(),
    );

    h.service
        .request_view(ViewRequest::frame(IMAGE_ID, 0, 0, zoomed))
        .unwrap();
    h.settle().await;

    let ready = h.sink.ready.lock().unwrap();
    assert_eq!(ready[0].1.shape(), ImageShape::new(2, 2));
    let stats = h.service.cache().stats();
    assert_eq!((stats.full_entries, stats.pyramid_entries), (0, 1));
}

// =============================================================================
// Coordinates
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_click_maps_to_rendered_pixel() {
    let mut h = Harness::new(InstrumentedSource::ramp(8, 8, 1), 2, MIB);
    let view = ViewState::new(CropRect::new(2.0, 2.0, 4.0, 4.0), DownsampleFactor::ONE);
    let request = ViewRequest::frame(IMAGE_ID, 0, 0, view);

    h.service.request_view(request.clone()).unwrap();
    h.settle().await;
    let frame = h.sink.ready.lock().unwrap()[0].1.clone();

    // Canvas (x=1, y=3) is display row 3, column 1 of the crop.
    let (y, x) = h.service.map_click(&request, 1.0, 3.0).unwrap().unwrap();
    assert_eq!((y, x), (5.0, 3.0));
    assert_eq!(frame.get(3, 1), Some((y * 8.0 + x) as f32));

    let overlay = h.service.overlay_rect(&request, Rect::new(3.0, 3.0, 2.0, 2.0));
    assert_eq!(overlay, Rect::new(1.0, 1.0, 2.0, 2.0));
}
