//! Pure point and rectangle transforms.
//!
//! Conventions:
//! - full-resolution and crop-relative points are `(y, x)` in image pixels
//! - display points are `(y, x)` after crop and downsampling
//! - view-surface (canvas) points are `(x, y)`: horizontal first

// =============================================================================
// Value Types
// =============================================================================

/// Axis-aligned rectangle `{y0, x0, height, width}`.
///
/// Used both for crop windows and for ROI geometry. It is a plain value:
/// view-state changes build a new one rather than mutating in place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// Top edge (row)
    pub y0: f64,

    /// Left edge (column)
    pub x0: f64,

    /// Extent along rows
    pub height: f64,

    /// Extent along columns
    pub width: f64,
}

/// Crop window in full-resolution pixel space.
pub type CropRect = Rect;

impl Rect {
    /// Create a new rectangle.
    pub const fn new(y0: f64, x0: f64, height: f64, width: f64) -> Self {
        Self {
            y0,
            x0,
            height,
            width,
        }
    }

    /// Rectangle covering a whole image.
    pub fn full(shape: ImageShape) -> Self {
        Self::new(0.0, 0.0, shape.height as f64, shape.width as f64)
    }

    /// Row one past the bottom edge.
    pub fn bottom(&self) -> f64 {
        self.y0 + self.height
    }

    /// Column one past the right edge.
    pub fn right(&self) -> f64 {
        self.x0 + self.width
    }

    /// True when the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        !(self.height > 0.0 && self.width > 0.0)
    }

    /// True when `(y, x)` lies inside `[y0, bottom) × [x0, right)`.
    pub fn contains(&self, y: f64, x: f64) -> bool {
        y >= self.y0 && y < self.bottom() && x >= self.x0 && x < self.right()
    }

    /// Smallest integer pixel window covering this rectangle.
    ///
    /// The origin is floored and the far edges are ceiled; negative
    /// coordinates saturate to zero.
    pub fn to_pixel_window(&self) -> PixelWindow {
        let y0 = self.y0.floor().max(0.0);
        let x0 = self.x0.floor().max(0.0);
        let y1 = self.bottom().ceil().max(y0);
        let x1 = self.right().ceil().max(x0);
        PixelWindow {
            y0: y0 as u32,
            x0: x0 as u32,
            height: (y1 - y0) as u32,
            width: (x1 - x0) as u32,
        }
    }
}

/// Integer pixel window, used wherever a crop must be hashable
/// (cache keys) or addressable (pixel extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelWindow {
    pub y0: u32,
    pub x0: u32,
    pub height: u32,
    pub width: u32,
}

impl PixelWindow {
    /// Window covering a whole image.
    pub fn full(shape: ImageShape) -> Self {
        Self {
            y0: 0,
            x0: 0,
            height: shape.height,
            width: shape.width,
        }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

/// Image dimensions `(height, width)` in full-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

/// Full-resolution pixels per display pixel. Always finite and `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DownsampleFactor(f64);

impl DownsampleFactor {
    /// No downsampling.
    pub const ONE: DownsampleFactor = DownsampleFactor(1.0);

    /// Create a factor, returning `None` unless `value` is finite and `>= 1`.
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 1.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Create a factor, mapping invalid or sub-unity values to `1`.
    pub fn saturating(value: f64) -> Self {
        Self::new(value).unwrap_or(Self::ONE)
    }

    /// The raw ratio.
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for DownsampleFactor {
    fn default() -> Self {
        Self::ONE
    }
}

// =============================================================================
// Point Transforms
// =============================================================================

/// Crop-relative point to full-resolution point.
pub fn crop_to_full(y_crop: f64, x_crop: f64, rect: CropRect) -> (f64, f64) {
    (y_crop + rect.y0, x_crop + rect.x0)
}

/// Full-resolution point to crop-relative point.
///
/// Points outside `rect` map to negative or over-sized results; this never
/// clips.
pub fn full_to_crop(y_full: f64, x_full: f64, rect: CropRect) -> (f64, f64) {
    (y_full - rect.y0, x_full - rect.x0)
}

/// Full-resolution point to display point.
///
/// Division is real-valued. Rounding to a display pixel is left to the
/// caller at the point of pixel addressing.
pub fn full_to_display(
    y_full: f64,
    x_full: f64,
    rect: CropRect,
    ds: DownsampleFactor,
) -> (f64, f64) {
    let (y_crop, x_crop) = full_to_crop(y_full, x_full, rect);
    (y_crop / ds.get(), x_crop / ds.get())
}

/// Display point to full-resolution point; inverse of [`full_to_display`].
pub fn display_to_full(
    y_disp: f64,
    x_disp: f64,
    rect: CropRect,
    ds: DownsampleFactor,
) -> (f64, f64) {
    crop_to_full(y_disp * ds.get(), x_disp * ds.get(), rect)
}

/// View-surface `(x, y)` to display `(y, x)`.
pub fn canvas_to_display(x_canvas: f64, y_canvas: f64) -> (f64, f64) {
    (y_canvas, x_canvas)
}

/// Display `(y, x)` to view-surface `(x, y)`.
pub fn display_to_canvas(y_disp: f64, x_disp: f64) -> (f64, f64) {
    (x_disp, y_disp)
}

// =============================================================================
// Rectangle Helpers
// =============================================================================

/// Clip `rect` to `[0, height) × [0, width)`.
///
/// The result always has non-negative extents. A rectangle lying fully
/// outside the image collapses to an empty rectangle on the nearest edge.
pub fn crop_rect_intersection(rect: CropRect, image_shape: ImageShape) -> CropRect {
    let h = image_shape.height as f64;
    let w = image_shape.width as f64;

    let y0 = rect.y0.clamp(0.0, h);
    let x0 = rect.x0.clamp(0.0, w);
    let y1 = rect.bottom().clamp(0.0, h);
    let x1 = rect.right().clamp(0.0, w);

    Rect::new(y0, x0, (y1 - y0).max(0.0), (x1 - x0).max(0.0))
}

/// Project a full-resolution ROI into display space.
///
/// Both opposite corners go through [`full_to_display`]. The result is not
/// clipped to the crop window; that is the renderer's job.
pub fn roi_rect_in_display_coords(
    roi_rect: Rect,
    crop_rect: CropRect,
    ds: DownsampleFactor,
) -> Rect {
    let (y_tl, x_tl) = full_to_display(roi_rect.y0, roi_rect.x0, crop_rect, ds);
    let (y_br, x_br) = full_to_display(roi_rect.bottom(), roi_rect.right(), crop_rect, ds);
    Rect::new(y_tl, x_tl, y_br - y_tl, x_br - x_tl)
}

// =============================================================================
// Tests
// =============================================================================
