use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info_span;
use tracing::Instrument;

use crate::analysis::{Extractor, Fetcher};
use crate::error::ValidationError;
use crate::quota::UNLIMITED;

use super::config::PipelineConfig;
use super::item::{ItemStatus, ProcessingItem};
use super::progress::{ProgressEvent, ProgressReporter};
use super::stage;
use super::validate;

/// A submitted run. Cloning shares the same items and cancel flag.
#[derive(Clone)]
pub struct RunHandle {
    id: String,
    items: Arc<Mutex<Vec<ProcessingItem>>>,
    cancelled: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of every item in submission order.
    pub fn items(&self) -> Vec<ProcessingItem> {
        match self.items.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn item(&self, position: usize) -> Option<ProcessingItem> {
        self.items().get(position).cloned()
    }

    fn store(&self, position: usize, item: ProcessingItem) {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slot) = items.get_mut(position) {
            *slot = item;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the run was cancelled.
    pub pending: usize,
    pub cancelled: bool,
}

/// Runs an ordered list of items through fetch → analyze, isolating failures
/// per item.
pub struct PipelineExecutor {
    config: Arc<PipelineConfig>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    findings_limit: i64,
}

impl PipelineExecutor {
    pub fn new(
        config: Arc<PipelineConfig>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
            findings_limit: UNLIMITED,
        }
    }

    /// Per-item findings allowance reported in logs when exceeded.
    pub fn with_findings_limit(mut self, limit: i64) -> Self {
        self.findings_limit = limit;
        self
    }

    /// Validates the URLs and prepares a run with every item pending.
    /// Nothing is fetched until [`run`](Self::run).
    pub fn submit<S: AsRef<str>>(&self, urls: &[S]) -> Result<RunHandle, ValidationError> {
        let urls = validate::validate_batch(
            urls,
            self.config.max_items_per_run,
            self.config.max_url_length,
        )?;
        let items = urls.into_iter().map(ProcessingItem::new).collect();
        Ok(RunHandle {
            id: uuid::Uuid::new_v4().to_string(),
            items: Arc::new(Mutex::new(items)),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Processes the run's pending items one after another. Reports progress
    /// after every finished item.
    pub async fn run(&self, handle: &RunHandle, progress: &dyn ProgressReporter) -> RunSummary {
        let span = info_span!("run", run_id = %handle.id);
        async {
            let total = handle.items().len();
            let mut completed = handle
                .items()
                .iter()
                .filter(|i| i.status.is_terminal())
                .count();
            tracing::info!(total, "Run started");

            for position in 0..total {
                if handle.is_cancelled() {
                    tracing::info!(completed, "Run cancelled");
                    break;
                }
                let Some(mut item) = handle.item(position) else {
                    break;
                };
                if item.status != ItemStatus::Pending {
                    continue;
                }

                let mut on_stage = |i: &ProcessingItem| {
                    handle.store(position, i.clone());
                    progress.report(ProgressEvent::Stage {
                        run_id: handle.id.clone(),
                        position,
                        status: i.status,
                    });
                };
                stage::process_item(
                    &mut item,
                    position,
                    self.fetcher.as_ref(),
                    self.extractor.as_ref(),
                    &self.config,
                    self.findings_limit,
                    &mut on_stage,
                )
                .await;
                handle.store(position, item);

                completed += 1;
                progress.report(ProgressEvent::Progress {
                    run_id: handle.id.clone(),
                    completed,
                    total,
                });
            }

            let summary = summarize(&handle.items(), handle.is_cancelled());
            tracing::info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                pending = summary.pending,
                "Run finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// Stops the run before its next item. Finished items keep their state
    /// and untouched items stay pending.
    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancelled.store(true, Ordering::Release);
        log::info!("Cancel requested for run {}", handle.id);
    }
}

fn summarize(items: &[ProcessingItem], cancelled: bool) -> RunSummary {
    let count = |status: ItemStatus| items.iter().filter(|i| i.status == status).count();
    RunSummary {
        total: items.len(),
        succeeded: count(ItemStatus::Success),
        failed: count(ItemStatus::Error),
        pending: count(ItemStatus::Pending),
        cancelled,
    }
}
