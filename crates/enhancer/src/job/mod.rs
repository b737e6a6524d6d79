//! Job entity, its durable snapshot and the snapshot store.

pub mod debounce;
pub mod record;
pub mod snapshot;
pub mod store;

pub use debounce::FlushScheduler;
pub use record::{
    FailedFile, FileState, FileStatus, JobPaths, JobRecord, JobResults, JobStatus, NewJob,
};
pub use snapshot::{JobFiles, JobListing, JobSnapshot};
pub use store::JobStore;
