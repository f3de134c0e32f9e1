use crate::jobs::BatchJob;

use super::item::ItemStatus;

/// Events emitted while a run or job is processed. Callers poll for state;
/// reporters are an in-process hook, not a delivery channel.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// An item entered a new stage.
    Stage {
        run_id: String,
        position: usize,
        status: ItemStatus,
    },
    /// Another item reached a terminal state. `completed` never decreases.
    Progress {
        run_id: String,
        completed: usize,
        total: usize,
    },
    /// A durable job changed.
    JobUpdated(Box<BatchJob>),
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes every event to the log at debug level.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage {
                run_id,
                position,
                status,
            } => log::debug!("[{}] item {} -> {}", run_id, position, status),
            ProgressEvent::Progress {
                run_id,
                completed,
                total,
            } => log::debug!("[{}] {}/{} items done", run_id, completed, total),
            ProgressEvent::JobUpdated(job) => log::debug!(
                "[{}] job {} at {}%",
                job.id,
                job.status,
                job.progress_percent
            ),
        }
    }
}
