//! Coordinate transforms between the nested spaces of an image view.
//!
//! Four spaces are involved whenever the viewer maps a click or draws an
//! overlay:
//!
//! ```text
//!   full-resolution (y, x)  ── crop ──►  crop-relative (y, x)
//!                                             │  ÷ downsample
//!                                             ▼
//!   view surface (x, y)  ◄── axis swap ──  display (y, x)
//! ```
//!
//! Every function here is pure and may be called from any thread. Nothing
//! clips or rounds implicitly: out-of-range inputs produce well-defined but
//! possibly out-of-range outputs, and the caller bounds-checks before
//! touching pixel memory.
//!
//! # Example
//!
//! ```
//! use viewcore::coords::{display_to_full, full_to_display, CropRect, DownsampleFactor};
//!
//! let rect = CropRect::new(10.0, 20.0, 100.0, 200.0);
//! let ds = DownsampleFactor::new(2.0).unwrap();
//!
//! assert_eq!(full_to_display(60.0, 120.0, rect, ds), (25.0, 50.0));
//! assert_eq!(display_to_full(25.0, 50.0, rect, ds), (60.0, 120.0));
//! ```

mod transform;
mod view_state;

pub use transform::{
    canvas_to_display, crop_rect_intersection, crop_to_full, display_to_canvas, display_to_full,
    full_to_crop, full_to_display, roi_rect_in_display_coords, CropRect, DownsampleFactor,
    ImageShape, PixelWindow, Rect,
};
pub use view_state::ViewState;
