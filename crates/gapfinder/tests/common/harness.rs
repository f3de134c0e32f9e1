//! Test harness for orchestrator-level tests.
//!
//! Everything runs on an in-memory database with a manual clock, so billing
//! periods and rate-limit windows only move when a test moves them.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use gapfinder::clock::ManualClock;
use gapfinder::config::Config;
use gapfinder::db::Database;
use gapfinder::jobs::{BatchJob, BatchJobOrchestrator, Collaborators, JobStore};
use gapfinder::quota::{QuotaGate, Resource};

use super::stubs::{RecordingProgress, StubExtractor, StubFetcher};

pub const OWNER: &str = "alice";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
}

/// Config used by the harness: no fetch retries, a generous rate limit and a
/// single worker so queue order is observable.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.fetch_retries = 0;
    config.rate_limit.max_submissions = 1000;
    config.jobs.worker_count = 1;
    config.jobs.persist_retries = 1;
    config.jobs.persist_backoff_ms = 1;
    config
}

/// `n` distinct paper URLs.
pub fn paper_urls(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("https://papers.example.org/{}", i))
        .collect()
}

pub struct TestHarness {
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub fetcher: Arc<StubFetcher>,
    pub progress: Arc<RecordingProgress>,
    pub orchestrator: BatchJobOrchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(
            config,
            Database::open_in_memory().expect("Failed to open test database"),
            Arc::new(ManualClock::new(start_time())),
            Arc::new(StubFetcher::new()),
        )
    }

    pub fn with_fetcher(fetcher: StubFetcher) -> Self {
        Self::build(
            test_config(),
            Database::open_in_memory().expect("Failed to open test database"),
            Arc::new(ManualClock::new(start_time())),
            Arc::new(fetcher),
        )
    }

    /// A second orchestrator on the same database and clock, as after a
    /// process restart.
    pub fn restarted(&self) -> Self {
        Self::build(
            test_config(),
            self.db.clone(),
            Arc::clone(&self.clock),
            Arc::new(StubFetcher::new()),
        )
    }

    fn build(
        config: Config,
        db: Database,
        clock: Arc<ManualClock>,
        fetcher: Arc<StubFetcher>,
    ) -> Self {
        let progress = Arc::new(RecordingProgress::default());
        let orchestrator = BatchJobOrchestrator::from_config(
            &config,
            db.clone(),
            clock.clone(),
            Collaborators {
                fetcher: fetcher.clone(),
                extractor: Arc::new(StubExtractor),
                progress: progress.clone(),
            },
        );
        Self {
            db,
            clock,
            fetcher,
            progress,
            orchestrator,
        }
    }

    pub fn quota(&self) -> &Arc<QuotaGate> {
        self.orchestrator.quota()
    }

    /// A job store sharing the harness database, for poking at rows the
    /// orchestrator would only touch mid-run.
    pub fn job_store(&self) -> JobStore {
        JobStore::new(self.db.clone(), self.clock.clone())
    }

    /// Current counter of `resource` for `owner`.
    pub fn usage(&self, owner: &str, resource: Resource) -> i64 {
        self.quota()
            .usage_summary(owner)
            .expect("usage summary")
            .resources
            .into_iter()
            .find(|r| r.resource == resource)
            .map(|r| r.current)
            .unwrap_or_default()
    }

    /// Polls until the job is terminal or five seconds pass.
    pub async fn wait_for_terminal(&self, job_id: &str) -> BatchJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.orchestrator.get_job(job_id).expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} still {} after 5s",
                job_id,
                job.status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
