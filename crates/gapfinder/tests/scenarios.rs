//! End-to-end scenarios for job admission, processing and cancellation.

mod common;

use common::{paper_urls, StubFetcher, TestHarness, OWNER};

use gapfinder::error::{GapfinderError, ValidationError};
use gapfinder::jobs::{JobKind, JobPriority, JobStatus, CANCELLED_BY_OWNER};
use gapfinder::pipeline::{ItemStatus, ProgressEvent};
use gapfinder::quota::Resource;

#[tokio::test]
async fn invalid_scheme_rejects_whole_submission() {
    let h = TestHarness::new();
    let urls = [
        "https://papers.example.org/1",
        "ftp://papers.example.org/2",
        "https://papers.example.org/3",
    ];

    let err = h
        .orchestrator
        .create_job(OWNER, JobKind::Analysis, &urls, JobPriority::Normal)
        .unwrap_err();

    assert!(matches!(
        err,
        GapfinderError::Validation(ValidationError::UnsupportedScheme { .. })
    ));
    assert!(h.orchestrator.list_jobs(OWNER, 10).unwrap().is_empty());
    assert_eq!(h.orchestrator.queued_jobs(), 0);
    assert_eq!(h.usage(OWNER, Resource::ItemsProcessed), 0);
}

#[tokio::test]
async fn failed_fetch_is_isolated_to_its_item() {
    let urls = paper_urls(3);
    let fetcher = StubFetcher::new();
    fetcher.fail_on(&urls[1]);
    let h = TestHarness::with_fetcher(fetcher);

    let job = h
        .orchestrator
        .create_job(OWNER, JobKind::Analysis, &urls, JobPriority::Normal)
        .unwrap();
    let done = h.orchestrator.process(&job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.completed_items, 3);
    assert_eq!(done.failed_items, 1);
    assert_eq!(done.progress_percent, 100);
    assert!(done.completed_at.is_some());

    let items = h.orchestrator.get_job_items(&job.id).unwrap();
    let statuses: Vec<ItemStatus> = items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Success, ItemStatus::Error, ItemStatus::Success]
    );
    assert_eq!(
        items[1].error_reason.as_deref(),
        Some("fetch: Server responded with HTTP 404")
    );
    assert_eq!(items[0].findings.len(), 1);
    assert_eq!(
        items[2].title.as_deref(),
        Some("Paper at https://papers.example.org/3")
    );
}

#[tokio::test]
async fn free_owner_at_limit_is_denied_without_persisting() {
    let h = TestHarness::new();
    h.quota()
        .record(OWNER, Resource::ItemsProcessed, 50)
        .unwrap();

    let err = h
        .orchestrator
        .create_job(
            OWNER,
            JobKind::Analysis,
            &paper_urls(1),
            JobPriority::Normal,
        )
        .unwrap_err();

    match err {
        GapfinderError::QuotaExceeded {
            resource, check, ..
        } => {
            assert_eq!(resource, Resource::ItemsProcessed);
            assert!(!check.allowed);
            assert_eq!(check.remaining, 0);
            assert_eq!(check.limit, 50);
            assert!(check.upgrade_required);
        }
        other => panic!("expected QuotaExceeded, got {:?}", other),
    }
    assert!(h.orchestrator.list_jobs(OWNER, 10).unwrap().is_empty());
    assert_eq!(h.usage(OWNER, Resource::ItemsProcessed), 50);
}

#[tokio::test]
async fn cancel_mid_run_keeps_finished_items() {
    let h = TestHarness::new();
    let job = h
        .orchestrator
        .create_job(
            OWNER,
            JobKind::Analysis,
            &paper_urls(5),
            JobPriority::Normal,
        )
        .unwrap();

    let orchestrator = h.orchestrator.clone();
    h.progress.set_hook(move |event| {
        if let ProgressEvent::Progress {
            run_id,
            completed: 2,
            ..
        } = event
        {
            let snapshot = orchestrator.cancel(run_id, OWNER).unwrap();
            assert_eq!(snapshot.status, JobStatus::Failed);
        }
    });

    let result = h.orchestrator.process(&job.id).await;
    assert!(matches!(result, Err(GapfinderError::Cancelled { .. })));

    let job = h.orchestrator.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_OWNER));
    assert_eq!(job.completed_items, 2);
    assert_eq!(job.failed_items, 0);
    assert_eq!(job.progress_percent, 40);

    let statuses: Vec<ItemStatus> = h
        .orchestrator
        .get_job_items(&job.id)
        .unwrap()
        .iter()
        .map(|i| i.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ItemStatus::Success,
            ItemStatus::Success,
            ItemStatus::Pending,
            ItemStatus::Pending,
            ItemStatus::Pending,
        ]
    );
    assert_eq!(h.fetcher.fetched().len(), 2);
}

#[tokio::test]
async fn cancelling_another_owners_job_is_not_found() {
    let h = TestHarness::new();
    let job = h
        .orchestrator
        .create_job(
            OWNER,
            JobKind::Analysis,
            &paper_urls(1),
            JobPriority::Normal,
        )
        .unwrap();

    assert!(matches!(
        h.orchestrator.cancel(&job.id, "mallory"),
        Err(GapfinderError::NotFound(_))
    ));
    assert_eq!(
        h.orchestrator.get_job(&job.id).unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn cancel_after_completion_is_a_no_op() {
    let h = TestHarness::new();
    let job = h
        .orchestrator
        .create_job(
            OWNER,
            JobKind::Analysis,
            &paper_urls(2),
            JobPriority::Normal,
        )
        .unwrap();
    let done = h.orchestrator.process(&job.id).await.unwrap();

    let after = h.orchestrator.cancel(&job.id, OWNER).unwrap();
    assert_eq!(after, done);
    assert_eq!(after.status, JobStatus::Completed);
    assert!(after.error_message.is_none());
}
