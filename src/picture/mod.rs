mod collect;
mod types;

pub use collect::collect_pictures;
pub use types::{FilePicture, PictureId, PictureIdentity, PictureRef, Size};
