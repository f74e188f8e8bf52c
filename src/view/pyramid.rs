//! Multi-resolution helpers.
//!
//! Pyramid levels are built on demand with mean pooling, which keeps
//! intensity statistics closer to the source than plain subsampling.
//! Level `n` is downsampled by `2^n`.

use crate::coords::ImageShape;

use super::frame::ImageFrame;

/// Deepest level the selector will choose by default.
pub const DEFAULT_MAX_PYRAMID_LEVEL: u32 = 3;

/// Display pixels per image pixel below which levels 1, 2 and 3 kick in.
const LEVEL_THRESHOLDS: [f64; 3] = [1.0, 0.5, 0.25];

/// Fraction above a level's threshold that still keeps that level.
const HYSTERESIS: f64 = 0.15;

/// Integer downsample factor of a pyramid level.
pub fn pyramid_level_factor(level: u32) -> u32 {
    1u32.checked_shl(level).unwrap_or(u32::MAX)
}

/// Deepest level whose factor does not exceed `downsample`.
pub fn level_for_downsample(downsample: f64, max_level: u32) -> u32 {
    (1..=max_level)
        .rev()
        .find(|&level| f64::from(pyramid_level_factor(level)) <= downsample)
        .unwrap_or(0)
}

/// Mean-pool `frame` by `factor` along both axes.
///
/// Trailing rows and columns that do not fill a whole block are dropped.
/// If that would leave nothing, the frame is returned unchanged.
pub fn downsample_mean_pool(frame: &ImageFrame, factor: u32) -> ImageFrame {
    let factor = factor.max(1);
    let out_h = frame.height() / factor;
    let out_w = frame.width() / factor;
    if factor == 1 || out_h == 0 || out_w == 0 {
        return frame.clone();
    }

    let src = frame.as_slice();
    let src_w = frame.width() as usize;
    let f = factor as usize;
    let area = (f * f) as f32;

    ImageFrame::from_fn(ImageShape::new(out_h, out_w), |y, x| {
        let (y0, x0) = (y as usize * f, x as usize * f);
        let sum: f32 = (y0..y0 + f)
            .map(|yy| src[yy * src_w + x0..yy * src_w + x0 + f].iter().sum::<f32>())
            .sum();
        sum / area
    })
}

/// Chooses a pyramid level from the current zoom without flickering.
///
/// Once a level is in use it is kept until the zoom moves more than 15%
/// past that level's threshold.
#[derive(Debug, Clone)]
pub struct PyramidLevelSelector {
    max_level: u32,
    last_level: u32,
}

impl PyramidLevelSelector {
    /// `max_level` is capped at the number of known thresholds.
    pub fn new(max_level: u32) -> Self {
        Self {
            max_level: max_level.min(LEVEL_THRESHOLDS.len() as u32),
            last_level: 0,
        }
    }

    /// Level for `pixels_per_image_px` display pixels per image pixel.
    pub fn select(&mut self, pixels_per_image_px: f64) -> u32 {
        let mut target = (1..=self.max_level)
            .rev()
            .find(|&level| pixels_per_image_px < threshold(level))
            .unwrap_or(0);

        let keep_band = threshold(self.last_level) * (1.0 + HYSTERESIS);
        if self.last_level > 0 && pixels_per_image_px < keep_band {
            target = target.max(self.last_level);
        }

        self.last_level = target;
        target
    }

    /// Level chosen by the last call to [`select`](Self::select).
    pub fn current(&self) -> u32 {
        self.last_level
    }

    /// Forget the last level, e.g. when interaction ends.
    pub fn reset(&mut self) {
        self.last_level = 0;
    }
}

impl Default for PyramidLevelSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PYRAMID_LEVEL)
    }
}

fn threshold(level: u32) -> f64 {
    LEVEL_THRESHOLDS
        .get(level.saturating_sub(1) as usize)
        .copied()
        .unwrap_or(0.25)
}
