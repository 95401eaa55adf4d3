mod load;
mod save;
mod settings;
mod types;

pub use load::LoadedConfig;
pub use save::save_config;
pub use settings::{MAX_WORKERS, Settings};
pub use types::{CompressConfig, ThumbConfig};
