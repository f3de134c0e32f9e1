//! Job repository: CRUD operations for the `batch_jobs` table.
//!
//! Status changes are conditional UPDATEs so that concurrent writers
//! (a worker finishing a job, an owner cancelling it) cannot overwrite a
//! terminal state the other side already committed.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub kind: String,
    pub status: String,
    pub priority: String,
    pub total_items: i64,
    pub completed_items: i64,
    pub failed_items: i64,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub result_summary: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            priority: row.get("priority")?,
            total_items: row.get("total_items")?,
            completed_items: row.get("completed_items")?,
            failed_items: row.get("failed_items")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error_message: row.get("error_message")?,
            result_summary: row.get("result_summary")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, owner_id, kind, status, priority, total_items, completed_items,
     failed_items, created_at, updated_at, started_at, completed_at, error_message, result_summary";

/// Inserts a new job row on an open connection (used inside transactions).
pub fn insert_in(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO batch_jobs (id, owner_id, kind, status, priority, total_items,
         completed_items, failed_items, created_at, updated_at, started_at, completed_at,
         error_message, result_summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job.id,
            job.owner_id,
            job.kind,
            job.status,
            job.priority,
            job.total_items,
            job.completed_items,
            job.failed_items,
            job.created_at,
            job.updated_at,
            job.started_at,
            job.completed_at,
            job.error_message,
            job.result_summary,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM batch_jobs WHERE id = ?1", SELECT_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Lists an owner's jobs, newest first.
pub fn list_by_owner(
    db: &Database,
    owner_id: &str,
    limit: u64,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM batch_jobs WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![owner_id, limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs that have not reached a terminal state, oldest first.
pub fn list_unfinished(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM batch_jobs WHERE status IN ('queued', 'processing')
             ORDER BY created_at ASC, rowid ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a queued job to processing. Keeps the original `started_at` when a
/// job is resumed. Returns false if the job is already terminal.
pub fn mark_started(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = 'processing', started_at = COALESCE(started_at, ?2),
             updated_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Counts one finished item against the job. Applies regardless of job
/// status: an item that was in flight when the job was cancelled still counts.
pub fn increment_progress_in(
    conn: &Connection,
    id: &str,
    failed: bool,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE batch_jobs SET completed_items = completed_items + 1,
         failed_items = failed_items + ?2, updated_at = ?3
         WHERE id = ?1 AND completed_items < total_items",
        params![id, failed as i64, now],
    )?;
    Ok(changed == 1)
}

/// Marks a processing job completed. Returns false if it was cancelled first.
pub fn complete_if_processing(
    db: &Database,
    id: &str,
    summary: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = 'completed', completed_at = ?3,
             result_summary = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, summary, now],
        )?;
        Ok(changed == 1)
    })
}

/// Marks a non-terminal job failed. Returns false once the job is terminal,
/// so a committed completion is never overwritten.
pub fn fail_if_active(
    db: &Database,
    id: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = 'failed', completed_at = ?3,
             error_message = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, error, now],
        )?;
        Ok(changed == 1)
    })
}
