//! Projection cache integration tests.
//!
//! Tests verify:
//! - The budget holds under long mixed workloads across both pools
//! - The 90% warning fires once per crossing, through the callback
//! - Telemetry is exportable as JSON

use std::sync::{Arc, Mutex};

use viewcore::{
    BudgetWarning, CacheKey, ImageFrame, ImageShape, PixelWindow, Pool, ProjectionCache,
    PutOutcome, ViewKind, ViewParams,
};

fn key(image_id: u64, level: u32, t: u64) -> CacheKey {
    let shape = ImageShape::new(8, 8);
    CacheKey::new(
        image_id,
        ViewKind::Frame,
        ViewParams {
            level,
            channel: 0,
            t,
            z: 0,
            window: PixelWindow::full(shape),
        },
    )
}

fn frame(edge: u32) -> ImageFrame {
    ImageFrame::filled(ImageShape::new(edge, edge), 1.0)
}

/// Small deterministic generator for workload shapes.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn test_budget_holds_under_mixed_workload() {
    let cache: ProjectionCache<ImageFrame> = ProjectionCache::new(64 * 1024);
    let budget = cache.budget();
    let mut rng = Lcg(7);

    for i in 0..2_000u64 {
        let level = (rng.next() % 3) as u32;
        let edge = 8 + (rng.next() % 48) as u32;
        let value = frame(edge);
        let size = value.nbytes();
        let k = key(rng.next() % 4, level, i % 37);

        if rng.next() % 3 == 0 {
            cache.get(&k);
        }
        match cache.put(k.clone(), value, size) {
            PutOutcome::Rejected { pool_budget, .. } => {
                assert!(size > pool_budget);
                assert!(!cache.contains(&k));
            }
            _ => assert!(cache.contains(&k)),
        }

        let stats = cache.stats();
        assert!(stats.used_bytes <= budget.total);
    }

    let telemetry = cache.telemetry();
    assert!(telemetry.eviction_count > 0);
    assert!(telemetry.pyramid_evictions <= telemetry.eviction_count);
    let split = cache.budget();
    assert!(split.for_pool(Pool::Pyramid) + split.for_pool(Pool::Full) <= budget.total);
}

#[test]
fn test_warning_fires_once_per_crossing() {
    let cache: ProjectionCache<ImageFrame> = ProjectionCache::with_pyramid_share(1000, 0.0);
    let warnings: Arc<Mutex<Vec<BudgetWarning>>> = Arc::default();
    let sink = warnings.clone();
    cache.set_warning_callback(move |w| sink.lock().unwrap().push(*w));

    let value = frame(1);
    cache.put(key(1, 0, 0), value.clone(), 500);
    cache.put(key(1, 0, 1), value.clone(), 450);
    assert_eq!(warnings.lock().unwrap().len(), 1);
    assert!(cache.telemetry().warned_at_90pct);

    // Still above 90%: no new warning.
    cache.put(key(1, 0, 2), value.clone(), 450);
    assert_eq!(warnings.lock().unwrap().len(), 1);

    // Drop below and cross again.
    cache.clear();
    assert!(!cache.telemetry().warned_at_90pct);
    cache.put(key(1, 0, 3), value.clone(), 950);
    let warnings = warnings.lock().unwrap();
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[1].used_bytes, 950);
    assert_eq!(warnings[1].budget_bytes, 1000);
}

#[test]
fn test_telemetry_exports_as_json() {
    let cache: ProjectionCache<ImageFrame> = ProjectionCache::new(1024);
    cache.put(key(1, 0, 0), frame(2), 16);
    cache.get(&key(1, 0, 0));
    cache.get(&key(1, 0, 1));

    let json = serde_json::json!({
        "telemetry": cache.telemetry(),
        "stats": cache.stats(),
    });
    assert_eq!(json["telemetry"]["hit_count"], 1);
    assert_eq!(json["telemetry"]["miss_count"], 1);
    assert_eq!(json["stats"]["full_entries"], 1);
    assert_eq!(json["stats"]["used_bytes"], 16);
}
