mod loader;
mod rotate;
mod state;

pub use loader::SourceImageLoader;
pub use rotate::{needs_rotation, rotate};
pub use state::SourceImageState;
