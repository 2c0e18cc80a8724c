// Jobs module
// Job records and the thread-safe store that owns them

mod params;
mod record;
mod store;

pub use params::ConfigExt;
pub use record::{
    JobConfig, JobFilter, JobRecord, JobStats, JobStatus, JobUpdate, LogEntry, Metrics, NewJob,
};
pub use store::JobStore;
