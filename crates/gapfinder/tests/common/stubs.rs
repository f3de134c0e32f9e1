//! Stub collaborators.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use gapfinder::analysis::{Extractor, FetchedDocument, Fetcher, Finding, FindingCategory};
use gapfinder::error::{AnalysisError, FetchError};
use gapfinder::pipeline::{ProgressEvent, ProgressReporter};

/// Serves a small document for every URL except the ones told to fail.
#[derive(Default)]
pub struct StubFetcher {
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each fetch sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Makes `url` fail with HTTP 404.
    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// URLs fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fetched.lock().unwrap().push(url.to_string());
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Status { status: 404 });
        }
        Ok(FetchedDocument {
            title: format!("Paper at {}", url),
            venue: Some("Workshop on Open Problems".to_string()),
            raw_content: format!("We leave {} for future work.", url),
        })
    }
}

/// Returns one methodology finding per document.
pub struct StubExtractor;

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, raw_content: &str) -> Result<Vec<Finding>, AnalysisError> {
        Ok(vec![Finding::new(
            raw_content,
            FindingCategory::Methodology,
            0.75,
        )])
    }
}

type Hook = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Keeps every event and optionally runs a hook after recording it.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
    hook: OnceLock<Hook>,
}

impl RecordingProgress {
    pub fn set_hook(&self, hook: impl Fn(&ProgressEvent) + Send + Sync + 'static) {
        if self.hook.set(Box::new(hook)).is_err() {
            panic!("hook already set");
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Progress percentages reported for one job, in order.
    pub fn job_percents(&self, job_id: &str) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::JobUpdated(job) if job.id == job_id => Some(job.progress_percent),
                _ => None,
            })
            .collect()
    }

    /// Job ids in the order their first item started.
    pub fn start_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for event in self.events() {
            if let ProgressEvent::Stage { run_id, .. } = event {
                if !order.contains(&run_id) {
                    order.push(run_id);
                }
            }
        }
        order
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
        if let Some(hook) = self.hook.get() {
            hook(&event);
        }
    }
}
