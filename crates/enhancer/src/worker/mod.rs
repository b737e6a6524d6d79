//! Worker threads, their job queue and output bundling.

pub mod bundle;
pub mod pool;
pub mod queue;

pub use bundle::{create_output_archive, has_outputs};
pub use pool::WorkerPool;
pub use queue::JobQueue;
