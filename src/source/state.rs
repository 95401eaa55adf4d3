use std::sync::Arc;

use image::RgbaImage;

use crate::error::{Result, ThumbError};

/// Lifecycle of a single source-image load.
#[derive(Debug, Clone, Default)]
pub enum SourceImageState {
    #[default]
    Uninitialised,
    Loading,
    Rotating,
    Ready {
        image: Arc<RgbaImage>,
        width: u32,
        height: u32,
    },
    Error(String),
}

impl SourceImageState {
    pub fn name(&self) -> &'static str {
        match self {
            SourceImageState::Uninitialised => "Uninitialised",
            SourceImageState::Loading => "Loading",
            SourceImageState::Rotating => "Rotating",
            SourceImageState::Ready { .. } => "Ready",
            SourceImageState::Error(_) => "Error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SourceImageState::Loading | SourceImageState::Rotating)
    }

    pub fn can_transition_to(&self, next: &SourceImageState) -> bool {
        use SourceImageState::*;
        matches!(
            (self, next),
            (_, Uninitialised)
                | (Uninitialised, Loading)
                | (Loading, Rotating)
                | (Loading, Ready { .. })
                | (Rotating, Ready { .. })
                | (Loading, Error(_))
                | (Rotating, Error(_))
        )
    }

    /// Move to `next`, refusing transitions the loader never makes.
    pub fn transition(&mut self, next: SourceImageState) -> Result<()> {
        if !self.can_transition_to(&next) {
            return Err(ThumbError::IllegalTransition {
                machine: "source image",
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = SourceImageState::Uninitialised;
    }
}
