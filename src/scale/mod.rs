mod scalable;
mod scaler;

pub use scalable::{ScalablePicture, ScalablePictureState};
pub use scaler::{
    ImageScaler, MIN_STEP_DIMENSION, ScaleMode, compute_scale_factor, effective_scale_factor,
    ensure_allocatable,
};
