pub mod analysis;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod quota;
pub mod ratelimit;
pub mod retry;
pub mod sanitize;

pub use analysis::{Extractor, FetchedDocument, Fetcher, Finding, FindingCategory, HttpFetcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    AnalysisError, ConfigError, FetchError, GapfinderError, Result, SubscriptionError,
    ValidationError,
};
pub use jobs::{BatchJob, BatchJobOrchestrator, Collaborators, JobItem, JobKind, JobPriority, JobStatus};
pub use logging::init_logging;
pub use pipeline::{PipelineConfig, PipelineExecutor, ProgressEvent, ProgressReporter, RunHandle, RunSummary};
pub use quota::{QuotaCheck, QuotaGate, Resource, Subscription, SubscriptionStore, Tier, UsageLedger};
pub use ratelimit::{InMemoryRateLimitStore, RateLimitKey, RateLimiter};
