mod store;

pub use store::{CacheKey, CacheStats, ThumbnailCache};
