use std::fmt;

use serde::Serialize;

/// Cache performance counters.
///
/// Lives as long as the cache. [`ProjectionCache::clear`] leaves it alone;
/// only [`ProjectionCache::reset_stats`] zeroes the counters.
///
/// [`ProjectionCache::clear`]: super::ProjectionCache::clear
/// [`ProjectionCache::reset_stats`]: super::ProjectionCache::reset_stats
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheTelemetry {
    pub hit_count: u64,
    pub miss_count: u64,

    /// Entries evicted by budget enforcement, both pools
    pub eviction_count: u64,

    /// Bytes reclaimed by budget enforcement
    pub bytes_evicted: u64,

    /// Subset of `eviction_count` taken from the pyramid pool
    pub pyramid_evictions: u64,

    /// Entries refused because they exceed their pool budget
    pub rejected_count: u64,

    /// Set while usage is at or above 90% of the budget
    pub warned_at_90pct: bool,
}

impl CacheTelemetry {
    /// Hits over lookups, `0.0` when nothing was looked up yet.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// Zero every counter. The warning flag tracks live usage and is kept.
    pub(crate) fn reset_counters(&mut self) {
        *self = Self {
            warned_at_90pct: self.warned_at_90pct,
            ..Self::default()
        };
    }
}

/// Occupancy snapshot for status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub used_bytes: usize,
    pub budget_bytes: usize,
    pub full_entries: usize,
    pub pyramid_entries: usize,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.full_entries + self.pyramid_entries
    }
}

/// Payload of the budget-pressure callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetWarning {
    pub used_bytes: usize,
    pub budget_bytes: usize,
    pub percent: f64,
}

impl fmt::Display for BudgetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cache at {:.1}% of budget ({}/{} bytes)",
            self.percent, self.used_bytes, self.budget_bytes
        )
    }
}
