use serde::{Deserialize, Serialize};

/// PNG compression level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CompressConfig {
    /// Optimization level 0-6
    Level(u8),
    /// Maximum compression ("max")
    Max(String),
}

/// thumbq configuration file structure.
///
/// All paths in the config are relative to the config file location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThumbConfig {
    /// Config file version (currently 1)
    pub version: u32,
    /// Input file paths or glob patterns
    pub input: Vec<String>,
    /// Output directory for rendered thumbnails
    pub output_dir: String,
    /// Edge length of the square bounding box thumbnails must fit into
    pub thumbnail_size: u32,
    /// Maximum number of thumbnails kept in memory
    pub max_cache_entries: usize,
    /// Nearest-neighbour single-step scaling instead of multi-step bicubic
    pub fast_scale: bool,
    /// Number of downsampling steps in quality mode
    pub scale_steps: u32,
    /// Never scale a picture above its original size
    pub dont_enlarge_small_images: bool,
    /// Number of worker threads
    pub workers: usize,
    /// Largest single bitmap allocation a decode or scale step may make
    pub max_image_bytes: u64,
    /// Decodes slower than this are logged as warnings
    pub slow_decode_warn_ms: u64,
    /// Consecutive failures after which the pool reports it is not making progress
    pub failure_alert_threshold: usize,
    /// Output format for rendered thumbnails: "png" or "jpeg"
    pub format: String,
    /// JPEG quality 1-100
    pub jpeg_quality: u8,
    /// PNG compression configuration (optional)
    pub compress: Option<CompressConfig>,
}

impl Default for ThumbConfig {
    fn default() -> Self {
        Self {
            version: 1,
            input: Vec::new(),
            output_dir: ".".to_string(),
            thumbnail_size: 350,
            max_cache_entries: 1000,
            fast_scale: false,
            scale_steps: 2,
            dont_enlarge_small_images: true,
            workers: 2,
            max_image_bytes: 512 * 1024 * 1024,
            slow_decode_warn_ms: 5000,
            failure_alert_threshold: 25,
            format: "png".to_string(),
            jpeg_quality: 80,
            compress: None,
        }
    }
}
