use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use log::{debug, error};

use super::{ImageScaler, compute_scale_factor, effective_scale_factor};
use crate::config::Settings;
use crate::error::{Result, ThumbError};
use crate::picture::Size;
use crate::source::SourceImageLoader;

/// Bounding box substituted when asked to fit into a box with no area.
const FALLBACK_SCALE_SIZE: Size = Size {
    width: 100,
    height: 100,
};

/// Lifecycle of a picture being loaded and scaled.
#[derive(Debug, Default)]
pub enum ScalablePictureState {
    #[default]
    Uninitialised,
    Loading,
    Loaded,
    Scaling,
    Ready {
        image: RgbaImage,
        width: u32,
        height: u32,
    },
    Error(String),
}

impl ScalablePictureState {
    pub fn name(&self) -> &'static str {
        match self {
            ScalablePictureState::Uninitialised => "Uninitialised",
            ScalablePictureState::Loading => "Loading",
            ScalablePictureState::Loaded => "Loaded",
            ScalablePictureState::Scaling => "Scaling",
            ScalablePictureState::Ready { .. } => "Ready",
            ScalablePictureState::Error(_) => "Error",
        }
    }

    pub fn can_transition_to(&self, next: &ScalablePictureState) -> bool {
        use ScalablePictureState::*;
        matches!(
            (self, next),
            (_, Uninitialised)
                | (Uninitialised, Loading)
                | (Loading, Loaded)
                | (Loaded, Scaling)
                | (Scaling, Ready { .. })
                | (Loading | Loaded | Scaling, Error(_))
        )
    }

    pub fn transition(&mut self, next: ScalablePictureState) -> Result<()> {
        if !self.can_transition_to(&next) {
            return Err(ThumbError::IllegalTransition {
                machine: "scalable picture",
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScaleTarget {
    Factor(f64),
    FitInside(Size),
}

/// Loads one picture and produces one scaled bitmap from it.
///
/// The scaled bitmap is owned here until [`ScalablePicture::take_scaled`]
/// hands it on.
#[derive(Debug)]
pub struct ScalablePicture {
    loader: SourceImageLoader,
    scaler: ImageScaler,
    dont_enlarge: bool,
    target: ScaleTarget,
    scale_factor: f64,
    source: Option<Arc<RgbaImage>>,
    state: ScalablePictureState,
}

impl ScalablePicture {
    pub fn new(scaler: ImageScaler, max_image_bytes: u64) -> Self {
        Self {
            loader: SourceImageLoader::new(max_image_bytes),
            scaler: scaler.max_image_bytes(max_image_bytes),
            dont_enlarge: false,
            target: ScaleTarget::Factor(1.0),
            scale_factor: 1.0,
            source: None,
            state: ScalablePictureState::Uninitialised,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let scaler = ImageScaler::new(settings.scale_mode(), settings.scale_steps);
        Self::new(scaler, settings.max_image_bytes)
            .dont_enlarge(settings.dont_enlarge_small_images)
    }

    pub fn dont_enlarge(mut self, dont_enlarge: bool) -> Self {
        self.dont_enlarge = dont_enlarge;
        self
    }

    /// Scale by a fixed factor regardless of the picture size.
    pub fn set_scale_factor(&mut self, factor: f64) {
        self.target = ScaleTarget::Factor(factor);
        self.scale_factor = factor;
    }

    /// Scale so the picture fits inside `size`.
    pub fn set_scale_size(&mut self, size: Size) {
        let size = if size.is_empty() {
            FALLBACK_SCALE_SIZE
        } else {
            size
        };
        self.target = ScaleTarget::FitInside(size);
    }

    pub fn scale_size(&self) -> Option<Size> {
        match self.target {
            ScaleTarget::FitInside(size) => Some(size),
            ScaleTarget::Factor(_) => None,
        }
    }

    /// Load `path` synchronously, replacing whatever was loaded before.
    pub fn load_picture(&mut self, path: &Path, rotation: f64) -> Result<()> {
        self.source = None;
        self.state = ScalablePictureState::Uninitialised;
        self.state.transition(ScalablePictureState::Loading)?;

        match self.loader.load(path, rotation) {
            Ok(image) => {
                self.source = Some(image);
                self.state.transition(ScalablePictureState::Loaded)
            }
            Err(ThumbError::Superseded) => {
                self.state = ScalablePictureState::Uninitialised;
                Err(ThumbError::Superseded)
            }
            Err(e) => {
                self.state
                    .transition(ScalablePictureState::Error(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Scale the loaded source according to the configured target.
    pub fn scale_picture(&mut self) -> Result<()> {
        let source = match (&self.state, &self.source) {
            (ScalablePictureState::Loaded, Some(source)) => Arc::clone(source),
            _ => {
                return Err(ThumbError::ScaleFailed(format!(
                    "no source picture to scale (state {})",
                    self.state.name()
                )));
            }
        };
        self.state.transition(ScalablePictureState::Scaling)?;

        let factor = match self.target {
            ScaleTarget::Factor(factor) => factor,
            ScaleTarget::FitInside(size) => effective_scale_factor(
                compute_scale_factor(source.width(), source.height(), size.width, size.height),
                self.dont_enlarge,
            ),
        };

        match self.scaler.scale(&source, factor) {
            Ok(image) => {
                self.scale_factor = factor;
                let (width, height) = image.dimensions();
                debug!("Scaled picture by {:.4} to {}x{}", factor, width, height);
                self.state.transition(ScalablePictureState::Ready {
                    image,
                    width,
                    height,
                })
            }
            Err(e) => {
                if let ThumbError::OutOfMemory(ref message) = e {
                    error!("Out of memory while scaling a picture: {}", message);
                }
                drop(source);
                self.release_source();
                self.state
                    .transition(ScalablePictureState::Error(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Hand the scaled bitmap over, resetting this picture.
    pub fn take_scaled(&mut self) -> Option<RgbaImage> {
        match std::mem::take(&mut self.state) {
            ScalablePictureState::Ready { image, .. } => {
                self.release_source();
                Some(image)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    fn release_source(&mut self) {
        self.source = None;
        self.loader.release();
    }

    pub fn scaled_size(&self) -> (u32, u32) {
        match self.state {
            ScalablePictureState::Ready { width, height, .. } => (width, height),
            _ => (0, 0),
        }
    }

    /// Size of the loaded source after rotation, or 0x0.
    pub fn original_size(&self) -> (u32, u32) {
        self.source
            .as_ref()
            .map(|s| s.dimensions())
            .unwrap_or((0, 0))
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn status(&self) -> &ScalablePictureState {
        &self.state
    }

    pub fn load_time(&self) -> Duration {
        self.loader.load_time()
    }

    pub fn stop_loading_except(&self, path: &Path) -> bool {
        self.loader.stop_loading_except(path)
    }
}
