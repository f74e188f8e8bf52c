use super::transform::{
    canvas_to_display, crop_rect_intersection, display_to_canvas, display_to_full,
    full_to_display, roi_rect_in_display_coords, CropRect, DownsampleFactor, ImageShape, Rect,
};

/// Immutable snapshot of the view geometry: crop window plus downsampling.
///
/// A new snapshot is built on every pan, zoom or scrub and passed by value,
/// so no coordinate state is ever shared or locked.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewState {
    pub crop: CropRect,
    pub downsample: DownsampleFactor,
}

impl ViewState {
    pub fn new(crop: CropRect, downsample: DownsampleFactor) -> Self {
        Self { crop, downsample }
    }

    /// Whole image, no downsampling.
    pub fn full_image(shape: ImageShape) -> Self {
        Self::new(Rect::full(shape), DownsampleFactor::ONE)
    }

    /// Same downsampling, crop clipped to the image bounds.
    pub fn clipped_to(&self, shape: ImageShape) -> Self {
        Self::new(crop_rect_intersection(self.crop, shape), self.downsample)
    }

    /// Map a view-surface click `(x, y)` to full-resolution `(y, x)`.
    pub fn canvas_to_full(&self, x_canvas: f64, y_canvas: f64) -> (f64, f64) {
        let (y_disp, x_disp) = canvas_to_display(x_canvas, y_canvas);
        display_to_full(y_disp, x_disp, self.crop, self.downsample)
    }

    /// Map a full-resolution `(y, x)` to view-surface `(x, y)`.
    pub fn full_to_canvas(&self, y_full: f64, x_full: f64) -> (f64, f64) {
        let (y_disp, x_disp) = full_to_display(y_full, x_full, self.crop, self.downsample);
        display_to_canvas(y_disp, x_disp)
    }

    /// Project a full-resolution ROI into display space.
    pub fn project_roi(&self, roi: Rect) -> Rect {
        roi_rect_in_display_coords(roi, self.crop, self.downsample)
    }
}
