use std::time::Duration;

use super::types::ThumbConfig;
use crate::error::{Result, ThumbError};
use crate::scale::ScaleMode;

/// Largest worker pool we are willing to start.
pub const MAX_WORKERS: usize = 16;

/// Immutable runtime snapshot of everything the pipeline reads.
///
/// Built once at startup and shared as `Arc<Settings>`; nothing in the
/// pipeline mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub thumbnail_size: u32,
    pub max_cache_entries: usize,
    pub fast_scale: bool,
    pub scale_steps: u32,
    pub dont_enlarge_small_images: bool,
    pub workers: usize,
    pub max_image_bytes: u64,
    pub slow_decode_warn: Duration,
    pub failure_alert_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config_unchecked(&ThumbConfig::default())
    }
}

impl Settings {
    /// Build settings from a config file, rejecting values the pipeline
    /// cannot run with.
    pub fn from_config(config: &ThumbConfig) -> Result<Self> {
        let settings = Self::from_config_unchecked(config);
        settings.validate()?;
        Ok(settings)
    }

    fn from_config_unchecked(config: &ThumbConfig) -> Self {
        Self {
            thumbnail_size: config.thumbnail_size,
            max_cache_entries: config.max_cache_entries,
            fast_scale: config.fast_scale,
            scale_steps: config.scale_steps,
            dont_enlarge_small_images: config.dont_enlarge_small_images,
            workers: config.workers,
            max_image_bytes: config.max_image_bytes,
            slow_decode_warn: Duration::from_millis(config.slow_decode_warn_ms),
            failure_alert_threshold: config.failure_alert_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.thumbnail_size == 0 {
            return Err(ThumbError::InvalidSettings(
                "thumbnail_size must be at least 1".to_string(),
            ));
        }
        if self.max_cache_entries == 0 {
            return Err(ThumbError::InvalidSettings(
                "max_cache_entries must be at least 1".to_string(),
            ));
        }
        if self.scale_steps == 0 {
            return Err(ThumbError::InvalidSettings(
                "scale_steps must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ThumbError::InvalidSettings(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.max_image_bytes == 0 {
            return Err(ThumbError::InvalidSettings(
                "max_image_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scale_mode(&self) -> ScaleMode {
        if self.fast_scale {
            ScaleMode::Fast
        } else {
            ScaleMode::Quality
        }
    }
}
