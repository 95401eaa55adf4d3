pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod picture;
pub mod pool;
pub mod queue;
pub mod scale;
pub mod service;
pub mod source;

pub use cache::{CacheKey, CacheStats, ThumbnailCache};
pub use config::Settings;
pub use dispatch::{ResultDispatcher, offline_placeholder};
pub use error::{ErrorKind, ThumbError};
pub use picture::{FilePicture, PictureId, PictureRef, Size};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{Priority, RequestHandle, RequestQueue, RequestorId};
pub use scale::{ImageScaler, ScalablePicture, ScaleMode};
pub use service::ThumbnailService;
pub use source::SourceImageLoader;
