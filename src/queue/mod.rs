mod pending;
mod request;

pub use pending::RequestQueue;
pub use request::{NewRequest, Priority, RequestHandle, RequestorId, ThumbnailRequest};
