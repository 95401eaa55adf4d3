use image::RgbaImage;
use image::imageops::{self, FilterType};
use log::debug;

use crate::error::{Result, ThumbError};

/// Dimension substituted for a step that would round down to nothing.
pub const MIN_STEP_DIMENSION: u32 = 100;

/// Trade-off between speed and smoothness when shrinking pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// One nearest-neighbour step by the full factor
    Fast,
    /// `steps` bicubic steps, each by `factor^(1/steps)`
    #[default]
    Quality,
}

/// Factor that fits a `source_width x source_height` picture inside
/// `max_width x max_height` while preserving its aspect ratio.
pub fn compute_scale_factor(
    source_width: u32,
    source_height: u32,
    max_width: u32,
    max_height: u32,
) -> f64 {
    let (sw, sh) = (f64::from(source_width), f64::from(source_height));
    let (mw, mh) = (f64::from(max_width), f64::from(max_height));
    if sh / mh > sw / mw {
        // Height is the binding edge
        mh / sh
    } else {
        mw / sw
    }
}

/// Apply the "don't enlarge small images" policy.
pub fn effective_scale_factor(factor: f64, dont_enlarge: bool) -> f64 {
    if dont_enlarge && factor > 1.0 {
        1.0
    } else {
        factor
    }
}

/// Fail with `OutOfMemory` if an RGBA buffer of this size exceeds `limit` bytes.
pub fn ensure_allocatable(width: u32, height: u32, limit: u64) -> Result<()> {
    let bytes = u64::from(width)
        .checked_mul(u64::from(height))
        .and_then(|px| px.checked_mul(4));
    match bytes {
        Some(bytes) if bytes <= limit => Ok(()),
        _ => Err(ThumbError::OutOfMemory(format!(
            "a {}x{} RGBA buffer exceeds the {} byte allocation limit",
            width, height, limit
        ))),
    }
}

/// Target size of one scaling step, rounding half to even.
fn step_size(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let scaled = |dim: u32| {
        let value = (f64::from(dim) * factor).round_ties_even();
        if value < 1.0 {
            MIN_STEP_DIMENSION
        } else {
            value.min(f64::from(u32::MAX)) as u32
        }
    };
    (scaled(width), scaled(height))
}

#[derive(Debug, Clone, Copy)]
pub struct ImageScaler {
    mode: ScaleMode,
    steps: u32,
    max_image_bytes: u64,
}

impl ImageScaler {
    pub fn new(mode: ScaleMode, steps: u32) -> Self {
        Self {
            mode,
            steps: steps.max(1),
            max_image_bytes: u64::MAX,
        }
    }

    pub fn max_image_bytes(mut self, limit: u64) -> Self {
        self.max_image_bytes = limit;
        self
    }

    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Resize `source` by `factor`, leaving the source untouched.
    pub fn scale(&self, source: &RgbaImage, factor: f64) -> Result<RgbaImage> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ThumbError::ScaleFailed(format!(
                "invalid scale factor {}",
                factor
            )));
        }
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(ThumbError::ScaleFailed(format!(
                "cannot scale an empty {}x{} picture",
                width, height
            )));
        }

        let (steps, step_factor, filter) = match self.mode {
            ScaleMode::Fast => (1, factor, FilterType::Nearest),
            ScaleMode::Quality => (
                self.steps,
                factor.powf(1.0 / f64::from(self.steps)),
                FilterType::CatmullRom,
            ),
        };

        // Intermediate sizes are measured from the source; the last step
        // always lands on the exact target.
        let target = step_size(width, height, factor);
        let mut current: Option<RgbaImage> = None;
        for step in 0..steps {
            let input = current.as_ref().unwrap_or(source);
            let (w, h) = input.dimensions();
            let (target_w, target_h) = if step + 1 == steps {
                target
            } else {
                step_size(width, height, step_factor.powf(f64::from(step + 1)))
            };
            if (target_w, target_h) == (w, h) {
                continue;
            }
            ensure_allocatable(target_w, target_h, self.max_image_bytes)?;
            debug!(
                "Scale step {}/{}: {}x{} -> {}x{}",
                step + 1,
                steps,
                w,
                h,
                target_w,
                target_h
            );
            current = Some(imageops::resize(input, target_w, target_h, filter));
        }

        Ok(match current {
            Some(image) => image,
            None => source.clone(),
        })
    }
}
