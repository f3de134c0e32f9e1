//! Fetch and analyze stages for a single item.
//!
//! Used both by [`PipelineExecutor`](super::PipelineExecutor) and by the job
//! orchestrator so the two apply identical timeout, retry and isolation
//! rules.

use tracing::{info_span, Instrument};

use crate::analysis::{Extractor, FetchedDocument, Fetcher, Finding};
use crate::error::{AnalysisError, FetchError};
use crate::quota::UNLIMITED;
use crate::retry::retry_async;
use crate::sanitize;

use super::config::PipelineConfig;
use super::item::ProcessingItem;

/// Calls the fetcher with a timeout, retrying transient failures.
pub async fn fetch_document(
    fetcher: &dyn Fetcher,
    url: &str,
    config: &PipelineConfig,
) -> Result<FetchedDocument, FetchError> {
    let timeout_ms = config.fetch_timeout.as_millis() as u64;
    retry_async(
        config.fetch_retry,
        "fetch",
        || async {
            match tokio::time::timeout(config.fetch_timeout, fetcher.fetch(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout { timeout_ms }),
            }
        },
        FetchError::is_transient,
    )
    .await
}

/// Calls the extractor with a timeout. Never retried.
pub async fn analyze_document(
    extractor: &dyn Extractor,
    raw_content: &str,
    config: &PipelineConfig,
) -> Result<Vec<Finding>, AnalysisError> {
    match tokio::time::timeout(config.analyze_timeout, extractor.extract(raw_content)).await {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::Timeout {
            timeout_ms: config.analyze_timeout.as_millis() as u64,
        }),
    }
}

/// Drives one pending item to a terminal state. Failures end up on the item
/// as `Error` with a reason and are never returned. `on_stage` is called
/// after every stage change, including the terminal one.
pub async fn process_item(
    item: &mut ProcessingItem,
    position: usize,
    fetcher: &dyn Fetcher,
    extractor: &dyn Extractor,
    config: &PipelineConfig,
    findings_limit: i64,
    on_stage: &mut (dyn FnMut(&ProcessingItem) + Send),
) {
    let span = info_span!("item", position, host = %sanitize::redact_url(&item.url));
    async {
        if item.start_fetch().is_err() {
            tracing::warn!(status = %item.status, "Item is not pending, skipping");
            return;
        }
        on_stage(item);

        let document = match fetch_document(fetcher, &item.url, config).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::info!(error = %e, "Fetch failed");
                mark_failed(item, format!("fetch: {}", e));
                on_stage(item);
                return;
            }
        };

        if item
            .start_analysis(document, config.max_raw_content_length)
            .is_err()
        {
            return;
        }
        on_stage(item);

        let raw = item.raw_content.as_deref().unwrap_or_default();
        match analyze_document(extractor, raw, config).await {
            Ok(findings) => {
                if findings_limit != UNLIMITED && findings.len() as i64 > findings_limit {
                    tracing::info!(
                        found = findings.len(),
                        limit = findings_limit,
                        "Findings exceed the tier's per-item allowance"
                    );
                }
                let count = findings.len();
                if item.succeed(findings).is_ok() {
                    tracing::debug!(findings = count, "Item analyzed");
                }
            }
            Err(e) => {
                tracing::info!(error = %e, "Analysis failed");
                mark_failed(item, format!("analysis: {}", e));
            }
        }
        item.raw_content = None;
        on_stage(item);
    }
    .instrument(span)
    .await
}

fn mark_failed(item: &mut ProcessingItem, reason: String) {
    if let Err(e) = item.fail(reason) {
        tracing::warn!(error = %e, "Could not record item failure");
    }
}
