pub mod config;
pub mod executor;
pub mod item;
pub mod progress;
pub mod stage;
pub mod validate;

pub use config::PipelineConfig;
pub use executor::{PipelineExecutor, RunHandle, RunSummary};
pub use item::{ItemStatus, ProcessingItem};
pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressReporter};
