//! Durable job store on top of the `batch_jobs` and `job_items` tables.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::item_repo::{self, ItemRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, Database, DatabaseError};
use crate::pipeline::{ItemStatus, ProcessingItem};

use super::model::{BatchJob, JobItem, JobKind, JobPriority, JobStatus};

pub struct JobStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn now(&self) -> String {
        format_timestamp(self.clock.now())
    }

    /// Persists a new job and one pending item per URL in one transaction.
    /// A job without items is stored already completed.
    pub fn create(
        &self,
        owner_id: &str,
        kind: JobKind,
        priority: JobPriority,
        urls: &[String],
    ) -> Result<BatchJob, DatabaseError> {
        let now = self.now();
        let empty = urls.is_empty();
        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            kind: kind.as_str().to_string(),
            status: if empty {
                JobStatus::Completed
            } else {
                JobStatus::Queued
            }
            .as_str()
            .to_string(),
            priority: priority.as_str().to_string(),
            total_items: urls.len() as i64,
            completed_items: 0,
            failed_items: 0,
            created_at: now.clone(),
            updated_at: now.clone(),
            started_at: empty.then(|| now.clone()),
            completed_at: empty.then(|| now.clone()),
            error_message: None,
            result_summary: empty.then(|| "No items to process".to_string()),
        };

        self.db.with_transaction(|conn| {
            job_repo::insert_in(conn, &row)?;
            item_repo::insert_pending_in(conn, &row.id, urls, &now)
        })?;
        BatchJob::from_row(&row)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<BatchJob>, DatabaseError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(|row| BatchJob::from_row(&row))
            .transpose()
    }

    /// An owner's jobs, newest first.
    pub fn list_by_owner(&self, owner_id: &str, limit: u64) -> Result<Vec<BatchJob>, DatabaseError> {
        job_repo::list_by_owner(&self.db, owner_id, limit)?
            .iter()
            .map(BatchJob::from_row)
            .collect()
    }

    /// Queued and processing jobs, oldest first.
    pub fn list_unfinished(&self) -> Result<Vec<BatchJob>, DatabaseError> {
        job_repo::list_unfinished(&self.db)?
            .iter()
            .map(BatchJob::from_row)
            .collect()
    }

    pub fn items(&self, job_id: &str) -> Result<Vec<JobItem>, DatabaseError> {
        item_repo::list_for_job(&self.db, job_id)?
            .iter()
            .map(JobItem::from_row)
            .collect()
    }

    pub fn mark_started(&self, job_id: &str) -> Result<bool, DatabaseError> {
        job_repo::mark_started(&self.db, job_id, &self.now())
    }

    /// Saves an intermediate stage of an item. Job counters are untouched.
    pub fn save_item_stage(
        &self,
        job_id: &str,
        position: usize,
        item: &ProcessingItem,
    ) -> Result<(), DatabaseError> {
        let row = self.item_row(job_id, position, item)?;
        item_repo::update(&self.db, &row)
    }

    /// Saves a terminal item and counts it against the job atomically.
    pub fn record_item_outcome(
        &self,
        job_id: &str,
        position: usize,
        item: &ProcessingItem,
    ) -> Result<bool, DatabaseError> {
        let row = self.item_row(job_id, position, item)?;
        let failed = item.status == ItemStatus::Error;
        self.db.with_transaction(|conn| {
            item_repo::update_in(conn, &row)?;
            job_repo::increment_progress_in(conn, job_id, failed, &row.updated_at)
        })
    }

    pub fn complete_if_processing(&self, job_id: &str, summary: &str) -> Result<bool, DatabaseError> {
        job_repo::complete_if_processing(&self.db, job_id, summary, &self.now())
    }

    pub fn fail_if_active(&self, job_id: &str, error: &str) -> Result<bool, DatabaseError> {
        job_repo::fail_if_active(&self.db, job_id, error, &self.now())
    }

    /// Puts items interrupted mid-stage back to pending.
    pub fn reset_in_flight(&self, job_id: &str) -> Result<usize, DatabaseError> {
        item_repo::reset_in_flight(&self.db, job_id, &self.now())
    }

    fn item_row(
        &self,
        job_id: &str,
        position: usize,
        item: &ProcessingItem,
    ) -> Result<ItemRow, DatabaseError> {
        let findings = if item.findings.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&item.findings).map_err(|e| DatabaseError::Corrupt {
                    table: "job_items",
                    reason: format!("cannot encode findings: {}", e),
                })?,
            )
        };
        Ok(ItemRow {
            job_id: job_id.to_string(),
            position: position as i64,
            url: item.url.clone(),
            status: item.status.as_str().to_string(),
            error_reason: item.error_reason.clone(),
            title: item.title.clone(),
            venue: item.venue.clone(),
            findings,
            updated_at: self.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FetchedDocument, Finding, FindingCategory};
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn store() -> JobStore {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
        JobStore::new(Database::open_in_memory().unwrap(), Arc::new(clock))
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://a.org/{}", i)).collect()
    }

    fn finished(url: &str, ok: bool) -> ProcessingItem {
        let mut item = ProcessingItem::new(url);
        item.start_fetch().unwrap();
        if ok {
            item.start_analysis(
                FetchedDocument {
                    title: "A paper".to_string(),
                    venue: Some("NeurIPS".to_string()),
                    raw_content: "body".to_string(),
                },
                1000,
            )
            .unwrap();
            item.succeed(vec![Finding::new("gap", FindingCategory::Compute, 0.4)])
                .unwrap();
        } else {
            item.fail("fetch: Server responded with HTTP 404").unwrap();
        }
        item
    }

    #[test]
    fn test_create_persists_job_and_items() {
        let store = store();
        let job = store
            .create("alice", JobKind::Analysis, JobPriority::High, &urls(3))
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.total_items, 3);
        assert_eq!(store.get(&job.id).unwrap(), Some(job.clone()));

        let items = store.items(&job.id).unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.status == ItemStatus::Pending));
        assert_eq!(items[2].position, 2);
    }

    #[test]
    fn test_create_empty_job_is_completed() {
        let store = store();
        let job = store
            .create("alice", JobKind::Analysis, JobPriority::Normal, &[])
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.completed_at.is_some());
        assert!(store.list_unfinished().unwrap().is_empty());
    }

    #[test]
    fn test_record_item_outcome_updates_counters() {
        let store = store();
        let job = store
            .create("alice", JobKind::Analysis, JobPriority::Normal, &urls(2))
            .unwrap();
        store.mark_started(&job.id).unwrap();

        assert!(store
            .record_item_outcome(&job.id, 0, &finished("https://a.org/0", true))
            .unwrap());
        assert!(store
            .record_item_outcome(&job.id, 1, &finished("https://a.org/1", false))
            .unwrap());

        let job = store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.completed_items, 2);
        assert_eq!(job.failed_items, 1);
        assert_eq!(job.progress_percent, 100);

        let items = store.items(&job.id).unwrap();
        assert_eq!(items[0].findings.len(), 1);
        assert_eq!(items[0].venue.as_deref(), Some("NeurIPS"));
        assert_eq!(items[1].status, ItemStatus::Error);
        assert!(items[1].findings.is_empty());
    }

    #[test]
    fn test_save_item_stage_leaves_counters() {
        let store = store();
        let job = store
            .create("alice", JobKind::Export, JobPriority::Low, &urls(1))
            .unwrap();
        let mut item = ProcessingItem::new("https://a.org/0");
        item.start_fetch().unwrap();
        store.save_item_stage(&job.id, 0, &item).unwrap();

        assert_eq!(store.items(&job.id).unwrap()[0].status, ItemStatus::Fetching);
        assert_eq!(store.get(&job.id).unwrap().unwrap().completed_items, 0);

        assert_eq!(store.reset_in_flight(&job.id).unwrap(), 1);
        assert_eq!(store.items(&job.id).unwrap()[0].status, ItemStatus::Pending);
    }

    #[test]
    fn test_list_by_owner_filters_owner() {
        let store = store();
        store
            .create("alice", JobKind::Analysis, JobPriority::Normal, &urls(1))
            .unwrap();
        store
            .create("bob", JobKind::Analysis, JobPriority::Normal, &urls(1))
            .unwrap();

        let jobs = store.list_by_owner("alice", 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].owner_id, "alice");
    }
}
