mod format;

pub use format::{save_thumbnail, thumbnail_path, thumbnail_paths};
