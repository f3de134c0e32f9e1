//! Job item repository: the durable per-URL records of a batch job.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub job_id: String,
    pub position: i64,
    pub url: String,
    pub status: String,
    pub error_reason: Option<String>,
    pub title: Option<String>,
    pub venue: Option<String>,
    /// JSON-encoded list of findings.
    pub findings: Option<String>,
    pub updated_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            position: row.get("position")?,
            url: row.get("url")?,
            status: row.get("status")?,
            error_reason: row.get("error_reason")?,
            title: row.get("title")?,
            venue: row.get("venue")?,
            findings: row.get("findings")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts pending rows for every URL of a job, in submission order.
pub fn insert_pending_in(
    conn: &Connection,
    job_id: &str,
    urls: &[String],
    now: &str,
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO job_items (job_id, position, url, status, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4)",
    )?;
    for (position, url) in urls.iter().enumerate() {
        stmt.execute(params![job_id, position as i64, url, now])?;
    }
    Ok(())
}

/// Returns a job's items ordered by position.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ItemRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT job_id, position, url, status, error_reason, title, venue, findings,
             updated_at FROM job_items WHERE job_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Overwrites the mutable fields of an item.
pub fn update_in(conn: &Connection, item: &ItemRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE job_items SET status = ?3, error_reason = ?4, title = ?5, venue = ?6,
         findings = ?7, updated_at = ?8
         WHERE job_id = ?1 AND position = ?2",
        params![
            item.job_id,
            item.position,
            item.status,
            item.error_reason,
            item.title,
            item.venue,
            item.findings,
            item.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update(db: &Database, item: &ItemRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| update_in(conn, item))
}

/// Puts items that were mid-stage when the process stopped back to pending.
pub fn reset_in_flight(db: &Database, job_id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE job_items SET status = 'pending', updated_at = ?2
             WHERE job_id = ?1 AND status IN ('fetching', 'analyzing')",
            params![job_id, now],
        )?;
        Ok(changed)
    })
}
