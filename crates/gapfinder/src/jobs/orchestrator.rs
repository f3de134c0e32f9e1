//! Durable batch jobs: admission, queueing, processing and cancellation.
//!
//! A job is admitted once (validation, rate limit, quota), persisted with one
//! pending item per URL and handed to a pool of async workers. Workers run
//! the same per-item stages as [`PipelineExecutor`](crate::pipeline::PipelineExecutor)
//! and persist every outcome, so callers can poll `get_job` at any time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::analysis::{Extractor, Fetcher};
use crate::clock::Clock;
use crate::config::{Config, JobSettings};
use crate::db::{Database, DatabaseError};
use crate::error::{GapfinderError, Result, ValidationError};
use crate::pipeline::{
    stage, validate, ItemStatus, PipelineConfig, ProcessingItem, ProgressEvent, ProgressReporter,
};
use crate::quota::{QuotaGate, SubscriptionStore, UsageLedger, UNLIMITED};
use crate::ratelimit::{InMemoryRateLimitStore, RateLimiter};
use crate::retry::{retry_async, RetryPolicy};

use super::model::{BatchJob, JobItem, JobKind, JobPriority, JobStatus};
use super::queue::JobQueue;
use super::store::JobStore;

/// Error message recorded on a job cancelled through [`BatchJobOrchestrator::cancel`].
pub const CANCELLED_BY_OWNER: &str = "cancelled by owner";

/// Rate-limited action name for job submissions.
pub const CREATE_JOB_ACTION: &str = "create_job";

/// The injected collaborators a job needs per item.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub progress: Arc<dyn ProgressReporter>,
}

struct Inner {
    store: JobStore,
    quota: Arc<QuotaGate>,
    rate_limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    progress: Arc<dyn ProgressReporter>,
    pipeline: PipelineConfig,
    persist_retry: RetryPolicy,
    worker_count: usize,
    queue: JobQueue,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloning shares the same store, queue and workers.
#[derive(Clone)]
pub struct BatchJobOrchestrator {
    inner: Arc<Inner>,
}

impl BatchJobOrchestrator {
    pub fn new(
        store: JobStore,
        quota: Arc<QuotaGate>,
        rate_limiter: Arc<RateLimiter>,
        collaborators: Collaborators,
        pipeline: PipelineConfig,
        settings: &JobSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                quota,
                rate_limiter,
                fetcher: collaborators.fetcher,
                extractor: collaborators.extractor,
                progress: collaborators.progress,
                pipeline,
                persist_retry: RetryPolicy::new(settings.persist_retries, settings.persist_backoff_ms),
                worker_count: settings.worker_count.max(1),
                queue: JobQueue::new(),
                cancel_flags: Mutex::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Wires the quota, rate limiter and job store onto one database.
    pub fn from_config(
        config: &Config,
        db: Database,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> Self {
        let subscriptions = Arc::new(SubscriptionStore::new(db.clone(), Arc::clone(&clock)));
        let quota = Arc::new(QuotaGate::new(UsageLedger::new(db.clone(), subscriptions)));
        let rate_limiter = Arc::new(RateLimiter::from_settings(
            &config.rate_limit,
            InMemoryRateLimitStore::default(),
            Arc::clone(&clock),
        ));
        Self::new(
            JobStore::new(db, clock),
            quota,
            rate_limiter,
            collaborators,
            PipelineConfig::from_config(config),
            &config.jobs,
        )
    }

    pub fn quota(&self) -> &Arc<QuotaGate> {
        &self.inner.quota
    }

    /// Jobs waiting for a worker.
    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.len()
    }

    /// Spawns the worker pool. Must be called from within a tokio runtime;
    /// calling it again while workers run does nothing.
    pub fn start(&self) {
        let mut workers = match self.inner.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.inner.worker_count {
            let orchestrator = self.clone();
            workers.push(tokio::spawn(async move {
                orchestrator.run_worker(worker_id).await;
            }));
        }
        log::info!("Started {} job workers", self.inner.worker_count);
    }

    /// Stops accepting work and waits for every worker to finish its current
    /// job. Jobs still queued remain persisted for [`resume_unfinished`].
    ///
    /// [`resume_unfinished`]: BatchJobOrchestrator::resume_unfinished
    pub async fn shutdown(&self) {
        log::info!("Shutting down job workers...");
        self.inner.queue.close();
        let handles = match self.inner.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                log::error!("Worker {} panicked: {}", i, e);
            }
        }
        log::info!("All job workers have stopped");
    }

    async fn run_worker(&self, worker_id: usize) {
        log::debug!("Worker {} started", worker_id);
        while let Some(job_id) = self.inner.queue.pop().await {
            log::debug!("Worker {} processing job {}", worker_id, job_id);
            match self.process(&job_id).await {
                Ok(job) => log::debug!("Worker {} finished job {} ({})", worker_id, job.id, job.status),
                Err(GapfinderError::Cancelled { job_id }) => {
                    log::info!("Worker {} dropped cancelled job {}", worker_id, job_id)
                }
                Err(e) => log::error!("Worker {} failed job {}: {}", worker_id, job_id, e),
            }
        }
        log::debug!("Worker {} stopped", worker_id);
    }

    /// Admits a job: validates the URLs, applies the submission rate limit and
    /// consumes one unit of the kind's quota per item. Nothing is persisted
    /// when any of these fail. A job without items completes immediately.
    pub fn create_job<S: AsRef<str>>(
        &self,
        owner_id: &str,
        kind: JobKind,
        urls: &[S],
        priority: JobPriority,
    ) -> Result<BatchJob> {
        let inner = &self.inner;
        if owner_id.trim().is_empty() {
            return Err(ValidationError::EmptyOwner.into());
        }
        let urls = validate::normalize_urls(
            urls,
            inner.pipeline.max_items_per_run,
            inner.pipeline.max_url_length,
        )?;
        inner.rate_limiter.check_and_record(owner_id, CREATE_JOB_ACTION)?;

        if urls.is_empty() {
            let job = inner.store.create(owner_id, kind, priority, &urls)?;
            log::info!("Created empty {} job {} for {}", kind, job.id, owner_id);
            self.report_job(&job);
            return Ok(job);
        }

        let resource = kind.resource();
        let amount = u32::try_from(urls.len()).unwrap_or(u32::MAX);
        let check = inner.quota.try_consume(owner_id, resource, amount)?;
        if !check.allowed {
            return Err(GapfinderError::quota_exceeded(resource, check));
        }

        let job = match inner.store.create(owner_id, kind, priority, &urls) {
            Ok(job) => job,
            Err(e) => {
                log::warn!(
                    "Job for {} not persisted, {} {} stay consumed: {}",
                    owner_id,
                    amount,
                    resource,
                    e
                );
                return Err(e.into());
            }
        };

        self.cancel_flag(&job.id);
        if !inner.queue.push(&job.id, priority) {
            self.forget_cancel_flag(&job.id);
            log::warn!("Queue closed, job {} waits for resume", job.id);
        }
        log::info!(
            "Created {} job {} for {} with {} items ({} priority)",
            kind,
            job.id,
            owner_id,
            job.total_items,
            priority
        );
        self.report_job(&job);
        Ok(job)
    }

    /// Runs a job's pending items in order. Normally called by a queue
    /// worker. Returns `Cancelled` when the job was failed before or during
    /// the run.
    pub async fn process(&self, job_id: &str) -> Result<BatchJob> {
        let span = info_span!("job", job_id = %job_id);
        let result = self.process_items(job_id).instrument(span).await;
        self.forget_cancel_flag(job_id);
        result
    }

    async fn process_items(&self, job_id: &str) -> Result<BatchJob> {
        let inner = &self.inner;
        let job = self.load_job(job_id).await?;
        match job.status {
            JobStatus::Completed => return Ok(job),
            JobStatus::Failed => return Err(cancelled(job_id)),
            JobStatus::Queued | JobStatus::Processing => {}
        }

        if !self
            .persist_or_abandon(job_id, "mark job started", || {
                inner.store.mark_started(job_id)
            })
            .await?
        {
            return Err(cancelled(job_id));
        }
        tracing::info!(owner = %job.owner_id, total = job.total_items, "Job started");

        let findings_limit = match inner.quota.subscriptions().current(&job.owner_id) {
            Ok(sub) => sub.tier.limits().findings_per_item,
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve subscription, findings unlimited");
                UNLIMITED
            }
        };
        let flag = self.cancel_flag(job_id);
        let items = self
            .persist_or_abandon(job_id, "load job items", || inner.store.items(job_id))
            .await?;
        let total = items.len();
        let mut completed = items.iter().filter(|i| i.status.is_terminal()).count();

        for job_item in items {
            if job_item.status != ItemStatus::Pending {
                continue;
            }
            if flag.load(Ordering::Acquire) || self.cancelled_in_store(job_id).await? {
                tracing::info!(completed, total, "Job cancelled, stopping");
                return Err(cancelled(job_id));
            }

            let position = job_item.position;
            let mut item = ProcessingItem::new(job_item.url);
            let mut on_stage = |current: &ProcessingItem| {
                if !current.status.is_terminal() {
                    if let Err(e) = inner.store.save_item_stage(job_id, position, current) {
                        tracing::warn!(error = %e, "Could not save item stage");
                    }
                }
                inner.progress.report(ProgressEvent::Stage {
                    run_id: job_id.to_string(),
                    position,
                    status: current.status,
                });
            };
            stage::process_item(
                &mut item,
                position,
                inner.fetcher.as_ref(),
                inner.extractor.as_ref(),
                &inner.pipeline,
                findings_limit,
                &mut on_stage,
            )
            .await;

            self.persist_or_abandon(job_id, "record item outcome", || {
                inner.store.record_item_outcome(job_id, position, &item)
            })
            .await?;

            completed += 1;
            inner.progress.report(ProgressEvent::Progress {
                run_id: job_id.to_string(),
                completed,
                total,
            });
            let snapshot = self.load_job(job_id).await?;
            self.report_job(&snapshot);
        }

        let snapshot = self.load_job(job_id).await?;
        let summary = format!(
            "{} succeeded, {} failed",
            snapshot.completed_items - snapshot.failed_items,
            snapshot.failed_items
        );
        let completed_now = self
            .persist_or_abandon(job_id, "complete job", || {
                inner.store.complete_if_processing(job_id, &summary)
            })
            .await?;
        if !completed_now {
            tracing::info!("Job was cancelled before it could complete");
            return Err(cancelled(job_id));
        }

        let job = self.load_job(job_id).await?;
        tracing::info!(summary = %summary, "Job completed");
        self.report_job(&job);
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<BatchJob> {
        self.inner
            .store
            .get(job_id)?
            .ok_or_else(|| GapfinderError::NotFound(job_id.to_string()))
    }

    /// An owner's jobs, newest first.
    pub fn list_jobs(&self, owner_id: &str, limit: u64) -> Result<Vec<BatchJob>> {
        Ok(self.inner.store.list_by_owner(owner_id, limit)?)
    }

    /// Per-item results in submission order.
    pub fn get_job_items(&self, job_id: &str) -> Result<Vec<JobItem>> {
        self.get_job(job_id)?;
        Ok(self.inner.store.items(job_id)?)
    }

    /// Fails a queued or processing job on behalf of its owner. An item
    /// already in flight finishes and is still counted; no further item
    /// starts. A terminal job is returned unchanged.
    pub fn cancel(&self, job_id: &str, by_owner_id: &str) -> Result<BatchJob> {
        let inner = &self.inner;
        let job = inner
            .store
            .get(job_id)?
            .filter(|job| job.owner_id == by_owner_id)
            .ok_or_else(|| GapfinderError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        if inner.store.fail_if_active(job_id, CANCELLED_BY_OWNER)? {
            self.cancel_flag(job_id).store(true, Ordering::Release);
            log::info!("Job {} cancelled by {}", job_id, by_owner_id);
        }
        let snapshot = self.get_job(job_id)?;
        self.report_job(&snapshot);
        Ok(snapshot)
    }

    /// Re-enqueues jobs a previous process left queued or processing. Items
    /// interrupted mid-stage start over. Jobs this orchestrator already has
    /// queued or running are skipped. Returns the number of jobs queued.
    pub fn resume_unfinished(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut resumed = 0;
        for job in inner.store.list_unfinished()? {
            if !self.claim_cancel_flag(&job.id) {
                log::debug!("Job {} is already queued or running", job.id);
                continue;
            }
            let reset = match inner.store.reset_in_flight(&job.id) {
                Ok(reset) => reset,
                Err(e) => {
                    self.forget_cancel_flag(&job.id);
                    return Err(e.into());
                }
            };
            if reset > 0 {
                log::info!("Reset {} interrupted items of job {}", reset, job.id);
            }
            if !inner.queue.push(&job.id, job.priority) {
                self.forget_cancel_flag(&job.id);
                log::warn!("Queue closed, job {} not resumed", job.id);
                continue;
            }
            resumed += 1;
        }
        if resumed > 0 {
            log::info!("Resumed {} unfinished jobs", resumed);
        }
        Ok(resumed)
    }

    async fn persist<T>(
        &self,
        label: &str,
        op: impl Fn() -> std::result::Result<T, DatabaseError>,
    ) -> std::result::Result<T, DatabaseError> {
        retry_async(
            self.inner.persist_retry,
            label,
            || std::future::ready(op()),
            DatabaseError::is_transient,
        )
        .await
    }

    /// Like [`Self::persist`], but a failure that outlasts the retries also
    /// fails the job with the error recorded.
    async fn persist_or_abandon<T>(
        &self,
        job_id: &str,
        label: &str,
        op: impl Fn() -> std::result::Result<T, DatabaseError>,
    ) -> Result<T> {
        match self.persist(label, op).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.abandon(job_id, &e);
                Err(e.into())
            }
        }
    }

    async fn load_job(&self, job_id: &str) -> Result<BatchJob> {
        self.persist_or_abandon(job_id, "load job", || self.inner.store.get(job_id))
            .await?
            .ok_or_else(|| GapfinderError::NotFound(job_id.to_string()))
    }

    /// Best effort: the store already failed once.
    fn abandon(&self, job_id: &str, error: &DatabaseError) {
        let message = format!("persistence failure: {}", error);
        match self.inner.store.fail_if_active(job_id, &message) {
            Ok(_) => tracing::error!(error = %error, "Job failed on persistence error"),
            Err(e) => tracing::error!(
                error = %error,
                second_error = %e,
                "Job could not be marked failed"
            ),
        }
    }

    async fn cancelled_in_store(&self, job_id: &str) -> Result<bool> {
        let job = self
            .persist_or_abandon(job_id, "check cancellation", || {
                self.inner.store.get(job_id)
            })
            .await?;
        Ok(job.map_or(true, |job| job.status == JobStatus::Failed))
    }

    fn cancel_flag(&self, job_id: &str) -> Arc<AtomicBool> {
        let mut flags = match self.inner.cancel_flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(flags.entry(job_id.to_string()).or_default())
    }

    /// Registers a fresh flag. False if one already exists.
    fn claim_cancel_flag(&self, job_id: &str) -> bool {
        let mut flags = match self.inner.cancel_flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if flags.contains_key(job_id) {
            return false;
        }
        flags.insert(job_id.to_string(), Arc::default());
        true
    }

    fn forget_cancel_flag(&self, job_id: &str) {
        let mut flags = match self.inner.cancel_flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flags.remove(job_id);
    }

    fn report_job(&self, job: &BatchJob) {
        self.inner
            .progress
            .report(ProgressEvent::JobUpdated(Box::new(job.clone())));
    }
}

fn cancelled(job_id: &str) -> GapfinderError {
    GapfinderError::Cancelled {
        job_id: job_id.to_string(),
    }
}
