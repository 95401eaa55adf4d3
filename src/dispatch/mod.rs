mod dispatcher;
mod placeholder;

pub use dispatcher::{Delivery, DeliverySender, ResultDispatcher, ThumbnailOutcome};
pub use placeholder::offline_placeholder;
