use std::fmt;

use serde::Serialize;

use crate::coords::PixelWindow;

// =============================================================================
// View Kind
// =============================================================================

/// Kind of derived view stored in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    /// Single plane at `(t, z)`
    Frame,

    /// Mean over the time axis at fixed `z`
    Mean,

    /// Standard deviation over the time axis at fixed `z`
    Std,

    /// Maximum over the time axis at fixed `z`
    Max,
}

impl ViewKind {
    /// True for the kinds that reduce over the whole time axis.
    pub fn is_projection(self) -> bool {
        !matches!(self, ViewKind::Frame)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::Frame => "frame",
            ViewKind::Mean => "mean",
            ViewKind::Std => "std",
            ViewKind::Max => "max",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Parameters that distinguish two derived views of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewParams {
    /// Pyramid level (0 = full resolution)
    pub level: u32,

    pub channel: u32,

    /// Timeline index; 0 for projections over time
    pub t: u64,

    pub z: u32,

    /// Crop window in full-resolution pixels
    pub window: PixelWindow,
}

/// Cache key for derived views.
///
/// Equality is exact: two keys match only if every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Source image identifier
    pub image_id: u64,

    pub kind: ViewKind,

    pub params: ViewParams,
}

impl CacheKey {
    pub fn new(image_id: u64, kind: ViewKind, params: ViewParams) -> Self {
        Self {
            image_id,
            kind,
            params,
        }
    }

    /// The LRU pool this key is stored in.
    pub fn pool(&self) -> Pool {
        if self.params.level > 0 {
            Pool::Pyramid
        } else {
            Pool::Full
        }
    }
}

/// The two independently budgeted LRU pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    /// Full-resolution frames and projections
    Full,

    /// Downsampled pyramid levels
    Pyramid,
}
