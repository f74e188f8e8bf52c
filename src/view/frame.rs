use std::fmt;
use std::sync::Arc;

use crate::coords::{ImageShape, PixelWindow};

/// Immutable single-channel `f32` plane, row-major.
///
/// Cloning is cheap: pixel data sits behind an `Arc` so the same frame can
/// live in the cache, in the ring buffer and on screen at once.
#[derive(Clone, PartialEq)]
pub struct ImageFrame {
    shape: ImageShape,
    data: Arc<[f32]>,
}

impl ImageFrame {
    /// Wrap `data`; returns `None` if its length does not match the shape.
    pub fn from_vec(shape: ImageShape, data: Vec<f32>) -> Option<Self> {
        if data.len() != shape.height as usize * shape.width as usize {
            return None;
        }
        Some(Self {
            shape,
            data: data.into(),
        })
    }

    /// Build a frame by evaluating `f(y, x)` for every pixel.
    pub fn from_fn<F>(shape: ImageShape, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> f32,
    {
        let mut data = Vec::with_capacity(shape.height as usize * shape.width as usize);
        for y in 0..shape.height {
            for x in 0..shape.width {
                data.push(f(y, x));
            }
        }
        Self {
            shape,
            data: data.into(),
        }
    }

    /// Frame with every pixel set to `value`.
    pub fn filled(shape: ImageShape, value: f32) -> Self {
        Self::from_fn(shape, |_, _| value)
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Size of the pixel buffer in bytes, used for cache accounting.
    pub fn nbytes(&self) -> usize {
        std::mem::size_of_val(&*self.data)
    }

    /// Pixel at `(y, x)`, `None` if out of bounds.
    pub fn get(&self, y: u32, x: u32) -> Option<f32> {
        if y >= self.shape.height || x >= self.shape.width {
            return None;
        }
        self.data
            .get(y as usize * self.shape.width as usize + x as usize)
            .copied()
    }

    /// One row of pixels.
    pub fn row(&self, y: u32) -> Option<&[f32]> {
        if y >= self.shape.height {
            return None;
        }
        let width = self.shape.width as usize;
        let start = y as usize * width;
        self.data.get(start..start + width)
    }

    /// Copy out the part of `window` that lies inside the frame.
    ///
    /// Returns `None` when the clipped window is empty. A window covering
    /// the whole frame returns a cheap clone.
    pub fn crop(&self, window: PixelWindow) -> Option<ImageFrame> {
        let y0 = window.y0.min(self.shape.height);
        let x0 = window.x0.min(self.shape.width);
        let y1 = window.y0.saturating_add(window.height).min(self.shape.height);
        let x1 = window.x0.saturating_add(window.width).min(self.shape.width);
        if y1 <= y0 || x1 <= x0 {
            return None;
        }
        if (y0, x0, y1, x1) == (0, 0, self.shape.height, self.shape.width) {
            return Some(self.clone());
        }

        let shape = ImageShape::new(y1 - y0, x1 - x0);
        let mut data = Vec::with_capacity(shape.height as usize * shape.width as usize);
        for y in y0..y1 {
            let row = self.row(y)?;
            data.extend_from_slice(&row[x0 as usize..x1 as usize]);
        }
        Some(Self {
            shape,
            data: data.into(),
        })
    }
}

impl fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFrame")
            .field("height", &self.shape.height)
            .field("width", &self.shape.width)
            .finish_non_exhaustive()
    }
}
