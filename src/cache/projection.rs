//! Memory-budgeted cache for derived views.
//!
//! Entries carry an explicit byte size. Two LRU pools, full-resolution and
//! pyramid, each get their own slice of the budget so a burst of cheap
//! pyramid tiles cannot push out an expensive projection and vice versa.
//!
//! # Size-Based Eviction
//!
//! After every insert the affected pool evicts least-recently-used entries
//! until it is back within its sub-budget. An entry larger than its whole
//! pool budget is rejected up front.
//!
//! The 90% pressure check sees usage as it stands right after the insert,
//! before eviction makes room.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, warn};

use super::key::{CacheKey, Pool};
use super::telemetry::{BudgetWarning, CacheStats, CacheTelemetry};
use crate::sync::lock;

/// Default total budget: 1 GiB
pub const DEFAULT_CACHE_BUDGET: usize = 1024 * 1024 * 1024;

/// Default share of the budget reserved for pyramid levels
pub const DEFAULT_PYRAMID_SHARE: f64 = 0.25;

/// Usage percentage at which the budget warning fires
const WARNING_THRESHOLD_PERCENT: f64 = 90.0;

// =============================================================================
// Budget
// =============================================================================

/// Total byte budget and its pyramid slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    pub total: usize,

    /// Bytes reserved for the pyramid pool; the full pool gets the rest
    pub pyramid: usize,
}

impl CacheBudget {
    /// Split `total` using [`DEFAULT_PYRAMID_SHARE`].
    pub fn new(total: usize) -> Self {
        Self::with_pyramid_share(total, DEFAULT_PYRAMID_SHARE)
    }

    /// Split `total` giving `floor(total * share)` to the pyramid pool.
    ///
    /// `share` is clamped to `[0, 1)`; a non-finite share counts as zero.
    pub fn with_pyramid_share(total: usize, share: f64) -> Self {
        let share = if share.is_finite() {
            share.clamp(0.0, 0.999)
        } else {
            0.0
        };
        let pyramid = ((total as f64) * share).floor() as usize;
        Self {
            total,
            pyramid: pyramid.min(total),
        }
    }

    /// Bytes available to the full-resolution pool.
    pub fn full(&self) -> usize {
        self.total - self.pyramid
    }

    pub fn for_pool(&self, pool: Pool) -> usize {
        match pool {
            Pool::Full => self.full(),
            Pool::Pyramid => self.pyramid,
        }
    }
}

// =============================================================================
// Put Outcome
// =============================================================================

/// Result of [`ProjectionCache::put`]. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry stored; `evicted` older entries were dropped to make room
    Inserted { evicted: usize },

    /// Existing entry replaced as a whole
    Replaced { evicted: usize },

    /// Entry is larger than its pool budget and was not stored
    Rejected { size_bytes: usize, pool_budget: usize },
}

impl PutOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, PutOutcome::Rejected { .. })
    }
}

// =============================================================================
// Pools
// =============================================================================

struct Entry<V> {
    value: V,
    size_bytes: usize,
}

struct LruPool<V> {
    entries: LruCache<CacheKey, Entry<V>>,
    used_bytes: usize,
}

impl<V> LruPool<V> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            used_bytes: 0,
        }
    }

    /// Insert or replace; returns `true` on replace.
    fn insert(&mut self, key: CacheKey, entry: Entry<V>) -> bool {
        self.used_bytes += entry.size_bytes;
        match self.entries.put(key, entry) {
            Some(old) => {
                self.used_bytes = self.used_bytes.saturating_sub(old.size_bytes);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry<V>> {
        let entry = self.entries.pop(key)?;
        self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Pop LRU entries until within `budget`. Returns `(count, bytes)`.
    fn evict_to(&mut self, budget: usize) -> (u64, u64) {
        let mut count = 0;
        let mut bytes = 0;
        while self.used_bytes > budget {
            let Some((_, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);
            count += 1;
            bytes += entry.size_bytes as u64;
        }
        (count, bytes)
    }

    fn remove_image(&mut self, image_id: u64) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.image_id == image_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
    }
}

struct Inner<V> {
    full: LruPool<V>,
    pyramid: LruPool<V>,
    budget: CacheBudget,
    pyramid_share: f64,
    telemetry: CacheTelemetry,
}

impl<V> Inner<V> {
    fn pool_mut(&mut self, pool: Pool) -> &mut LruPool<V> {
        match pool {
            Pool::Full => &mut self.full,
            Pool::Pyramid => &mut self.pyramid,
        }
    }

    fn used_bytes(&self) -> usize {
        self.full.used_bytes + self.pyramid.used_bytes
    }

    fn evict(&mut self, pool: Pool) -> usize {
        let budget = self.budget.for_pool(pool);
        let (count, bytes) = self.pool_mut(pool).evict_to(budget);
        if count > 0 {
            self.telemetry.eviction_count += count;
            self.telemetry.bytes_evicted += bytes;
            if pool == Pool::Pyramid {
                self.telemetry.pyramid_evictions += count;
            }
            debug!(
                ?pool,
                evicted = count,
                bytes_reclaimed = bytes,
                total_evictions = self.telemetry.eviction_count,
                "Cache eviction"
            );
        }
        count as usize
    }

    /// Edge-triggered 90% check against the total budget.
    ///
    /// Inserts run it before evicting, so a pool churning at its own
    /// sub-budget still registers as pressure on the whole cache.
    fn check_pressure(&mut self) -> Option<BudgetWarning> {
        let used_bytes = self.used_bytes();
        let budget_bytes = self.budget.total;
        let percent = if budget_bytes > 0 {
            used_bytes as f64 * 100.0 / budget_bytes as f64
        } else {
            0.0
        };

        if budget_bytes == 0 || percent < WARNING_THRESHOLD_PERCENT {
            self.telemetry.warned_at_90pct = false;
            return None;
        }
        if self.telemetry.warned_at_90pct {
            return None;
        }

        self.telemetry.warned_at_90pct = true;
        let warning = BudgetWarning {
            used_bytes,
            budget_bytes,
            percent,
        };
        warn!(used_bytes, budget_bytes, "{}", warning);
        Some(warning)
    }
}

// =============================================================================
// Projection Cache
// =============================================================================

type WarningCallback = Arc<dyn Fn(&BudgetWarning) + Send + Sync>;

/// LRU cache for derived views with a byte budget and telemetry.
///
/// Every operation takes one mutex for the duration of O(1) work (amortised
/// over evictions), so concurrent callers observe a single serial order.
/// The warning callback runs after the lock is released.
///
/// # Example
///
/// ```
/// use viewcore::cache::{CacheKey, ProjectionCache, ViewKind, ViewParams};
///
/// let cache = ProjectionCache::with_pyramid_share(100, 0.0);
/// let k1 = CacheKey::new(1, ViewKind::Mean, ViewParams::default());
/// let k2 = CacheKey::new(2, ViewKind::Mean, ViewParams::default());
///
/// cache.put(k1.clone(), "first", 60);
/// cache.put(k2.clone(), "second", 60);
///
/// assert!(!cache.contains(&k1));
/// assert_eq!(cache.get(&k2), Some("second"));
/// assert_eq!(cache.telemetry().eviction_count, 1);
/// ```
pub struct ProjectionCache<V> {
    inner: Mutex<Inner<V>>,
    warning_callback: Mutex<Option<WarningCallback>>,
}

impl<V: Clone> ProjectionCache<V> {
    /// Create a cache with `total_bytes` split by [`DEFAULT_PYRAMID_SHARE`].
    pub fn new(total_bytes: usize) -> Self {
        Self::with_pyramid_share(total_bytes, DEFAULT_PYRAMID_SHARE)
    }

    /// Create a cache giving `floor(total_bytes * share)` to pyramid levels.
    pub fn with_pyramid_share(total_bytes: usize, share: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                full: LruPool::new(),
                pyramid: LruPool::new(),
                budget: CacheBudget::with_pyramid_share(total_bytes, share),
                pyramid_share: share,
                telemetry: CacheTelemetry::default(),
            }),
            warning_callback: Mutex::new(None),
        }
    }

    /// Look up a view, marking it most recently used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = lock(&self.inner);
        let value = inner
            .pool_mut(key.pool())
            .entries
            .get(key)
            .map(|entry| entry.value.clone());
        match value {
            Some(_) => inner.telemetry.hit_count += 1,
            None => inner.telemetry.miss_count += 1,
        }
        value
    }

    /// Check presence without touching recency or telemetry.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let inner = lock(&self.inner);
        match key.pool() {
            Pool::Full => inner.full.entries.contains(key),
            Pool::Pyramid => inner.pyramid.entries.contains(key),
        }
    }

    /// Insert or replace a view of `size_bytes`, then enforce the budget.
    pub fn put(&self, key: CacheKey, value: V, size_bytes: usize) -> PutOutcome {
        let pool = key.pool();
        let (outcome, warning) = {
            let mut inner = lock(&self.inner);
            let pool_budget = inner.budget.for_pool(pool);

            if size_bytes > pool_budget {
                inner.telemetry.rejected_count += 1;
                warn!(
                    image_id = key.image_id,
                    kind = %key.kind,
                    ?pool,
                    size_bytes,
                    pool_budget,
                    "Cache entry exceeds pool budget, not cached"
                );
                return PutOutcome::Rejected {
                    size_bytes,
                    pool_budget,
                };
            }

            let replaced = inner
                .pool_mut(pool)
                .insert(key, Entry { value, size_bytes });
            let warning = inner.check_pressure();
            let evicted = inner.evict(pool);

            let outcome = if replaced {
                PutOutcome::Replaced { evicted }
            } else {
                PutOutcome::Inserted { evicted }
            };
            (outcome, warning)
        };

        if let Some(warning) = warning {
            self.notify(&warning);
        }
        outcome
    }

    /// Remove one entry. Not counted as an eviction.
    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        let mut inner = lock(&self.inner);
        let entry = inner.pool_mut(key.pool()).remove(key);
        inner.check_pressure();
        entry.map(|e| e.value)
    }

    /// Drop every entry of one image in both pools. Returns the count.
    pub fn invalidate_image(&self, image_id: u64) -> usize {
        let mut inner = lock(&self.inner);
        let removed = inner.full.remove_image(image_id) + inner.pyramid.remove_image(image_id);
        inner.check_pressure();
        if removed > 0 {
            debug!(image_id, removed, "Invalidated cached views");
        }
        removed
    }

    /// Empty both pools. Telemetry is preserved.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.full.clear();
        inner.pyramid.clear();
        inner.check_pressure();
    }

    /// Zero telemetry counters. Entries are preserved.
    pub fn reset_stats(&self) {
        lock(&self.inner).telemetry.reset_counters();
    }

    /// Change the total budget, re-split it and evict down to the new limits.
    ///
    /// The 90% warning is re-armed and evaluated against the new budget
    /// before anything is evicted.
    pub fn set_budget(&self, total_bytes: usize) {
        let warning = {
            let mut inner = lock(&self.inner);
            inner.budget = CacheBudget::with_pyramid_share(total_bytes, inner.pyramid_share);
            inner.telemetry.warned_at_90pct = false;
            let warning = inner.check_pressure();
            inner.evict(Pool::Full);
            inner.evict(Pool::Pyramid);
            warning
        };
        if let Some(warning) = warning {
            self.notify(&warning);
        }
    }

    /// Install the budget-pressure callback, replacing any previous one.
    pub fn set_warning_callback<F>(&self, callback: F)
    where
        F: Fn(&BudgetWarning) + Send + Sync + 'static,
    {
        *lock(&self.warning_callback) = Some(Arc::new(callback));
    }

    /// Remove the budget-pressure callback. Warnings are still logged.
    pub fn clear_warning_callback(&self) {
        *lock(&self.warning_callback) = None;
    }

    pub fn budget(&self) -> CacheBudget {
        lock(&self.inner).budget
    }

    pub fn used_bytes(&self) -> usize {
        lock(&self.inner).used_bytes()
    }

    pub fn len(&self) -> usize {
        let inner = lock(&self.inner);
        inner.full.entries.len() + inner.pyramid.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = lock(&self.inner);
        CacheStats {
            used_bytes: inner.used_bytes(),
            budget_bytes: inner.budget.total,
            full_entries: inner.full.entries.len(),
            pyramid_entries: inner.pyramid.entries.len(),
        }
    }

    /// Telemetry snapshot.
    pub fn telemetry(&self) -> CacheTelemetry {
        lock(&self.inner).telemetry.clone()
    }

    fn notify(&self, warning: &BudgetWarning) {
        let callback = lock(&self.warning_callback).clone();
        if let Some(callback) = callback {
            callback(warning);
        }
    }
}

impl<V: Clone> Default for ProjectionCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BUDGET)
    }
}

// =============================================================================
// Tests
// =============================================================================
