//! Derived-view pipeline.
//!
//! Ties the pieces together along the path of a view-state change:
//! snapshot → cache lookup → background render → control-thread insert →
//! repaint.
//!
//! # Components
//!
//! - [`ViewService`]: main entry point, orchestrates the pipeline
//! - [`ImageFrame`]: immutable `f32` plane shared by cache, ring and display
//! - [`PixelSource`]: read-only pixel accessor supplied by the application
//! - [`MemorySource`]: in-memory [`PixelSource`] for tools and tests
//! - [`ViewSink`]: repaint/failure callbacks invoked on the control thread
//! - Pyramid helpers: [`downsample_mean_pool`], [`PyramidLevelSelector`]

mod frame;
mod pyramid;
mod service;
mod source;

pub use frame::ImageFrame;
pub use pyramid::{
    downsample_mean_pool, level_for_downsample, pyramid_level_factor, PyramidLevelSelector,
    DEFAULT_MAX_PYRAMID_LEVEL,
};
pub use service::{ViewLookup, ViewRequest, ViewService, ViewSink};
pub use source::{MemorySource, PixelSource};
