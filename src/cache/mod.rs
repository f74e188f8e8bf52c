//! Derived-view cache.
//!
//! # Cache Key
//!
//! Views are cached by a composite key including:
//! - Source image identifier
//! - View kind (frame or projection)
//! - Pyramid level, channel, `t`, `z`
//! - Integer crop window
//!
//! Keys with a pyramid level above zero live in a separate pool with its own
//! slice of the budget.
//!
//! # Telemetry
//!
//! Hits, misses, evictions, bytes reclaimed and rejected entries are counted
//! for the lifetime of the cache. A budget-pressure callback fires once each
//! time usage crosses 90% of the budget from below.

mod key;
mod projection;
mod telemetry;

pub use key::{CacheKey, Pool, ViewKind, ViewParams};
pub use projection::{
    CacheBudget, ProjectionCache, PutOutcome, DEFAULT_CACHE_BUDGET, DEFAULT_PYRAMID_SHARE,
};
pub use telemetry::{BudgetWarning, CacheStats, CacheTelemetry};
