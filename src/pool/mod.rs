mod stats;
mod worker;

pub use stats::PoolStats;
pub use worker::{WorkerPool, produce_thumbnail};
