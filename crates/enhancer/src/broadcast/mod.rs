//! Progress events and their per-job distribution.

pub mod bus;
pub mod event;

pub use bus::{ProgressBus, Subscription};
pub use event::{EventEnvelope, JobEvent, JobSummary};
