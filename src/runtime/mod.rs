//! Bounded task execution for environment workers.

mod error;
mod handle;
mod pool;

pub use error::Error;
pub use handle::TaskHandle;
pub use pool::{PoolConfig, WorkerPool};
