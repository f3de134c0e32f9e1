pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod store;

pub use model::{progress_percent, BatchJob, JobItem, JobKind, JobPriority, JobStatus};
pub use orchestrator::{BatchJobOrchestrator, Collaborators, CANCELLED_BY_OWNER, CREATE_JOB_ACTION};
pub use queue::JobQueue;
pub use store::JobStore;
