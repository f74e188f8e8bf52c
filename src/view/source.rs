use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::coords::ImageShape;
use crate::error::SourceError;
use crate::sync::lock;

use super::frame::ImageFrame;

// =============================================================================
// PixelSource Trait
// =============================================================================

/// Read-only access to source pixels, keyed by image id.
///
/// Implementations are called from worker threads and must not block for
/// longer than one frame read.
pub trait PixelSource: Send + Sync + 'static {
    /// Full-resolution dimensions of an image.
    fn shape(&self, image_id: u64) -> Result<ImageShape, SourceError>;

    /// Number of timeline positions.
    fn frame_count(&self, image_id: u64) -> Result<u64, SourceError>;

    /// One full-resolution plane.
    fn frame(&self, image_id: u64, t: u64, z: u32) -> Result<ImageFrame, SourceError>;
}

// =============================================================================
// In-Memory Source
// =============================================================================

struct MemoryImage {
    shape: ImageShape,
    depth: u32,

    /// Indexed `t * depth + z`
    frames: Vec<ImageFrame>,
}

/// [`PixelSource`] over stacks held in memory.
#[derive(Default)]
pub struct MemorySource {
    images: Mutex<HashMap<u64, Arc<MemoryImage>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `frames × depth` stack generated by `f(t, z, y, x)`.
    pub fn insert_with<F>(&self, image_id: u64, shape: ImageShape, frames: u64, depth: u32, f: F)
    where
        F: Fn(u64, u32, u32, u32) -> f32,
    {
        let depth = depth.max(1);
        let stack = (0..frames)
            .flat_map(|t| (0..depth).map(move |z| (t, z)))
            .map(|(t, z)| ImageFrame::from_fn(shape, |y, x| f(t, z, y, x)))
            .collect();
        let image = MemoryImage {
            shape,
            depth,
            frames: stack,
        };
        lock(&self.images).insert(image_id, Arc::new(image));
    }

    /// Drop an image. Returns `true` if it existed.
    pub fn remove(&self, image_id: u64) -> bool {
        lock(&self.images).remove(&image_id).is_some()
    }

    fn image(&self, image_id: u64) -> Result<Arc<MemoryImage>, SourceError> {
        lock(&self.images)
            .get(&image_id)
            .cloned()
            .ok_or(SourceError::ImageNotFound(image_id))
    }
}

impl PixelSource for MemorySource {
    fn shape(&self, image_id: u64) -> Result<ImageShape, SourceError> {
        Ok(self.image(image_id)?.shape)
    }

    fn frame_count(&self, image_id: u64) -> Result<u64, SourceError> {
        let image = self.image(image_id)?;
        Ok(image.frames.len() as u64 / u64::from(image.depth))
    }

    fn frame(&self, image_id: u64, t: u64, z: u32) -> Result<ImageFrame, SourceError> {
        let image = self.image(image_id)?;
        let frames = image.frames.len() as u64 / u64::from(image.depth);
        let out_of_range = || SourceError::FrameOutOfRange { t, z, frames };
        if z >= image.depth {
            return Err(out_of_range());
        }
        let index = t
            .checked_mul(u64::from(image.depth))
            .and_then(|i| i.checked_add(u64::from(z)))
            .ok_or_else(out_of_range)?;
        image
            .frames
            .get(index as usize)
            .cloned()
            .ok_or_else(out_of_range)
    }
}
