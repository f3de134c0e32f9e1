//! Usage repository: one counter row per `(owner, billing period)`.
//!
//! Counters only ever grow within a period. The conditional increment is a
//! single UPDATE, so the limit check and the write cannot interleave with a
//! concurrent consumer.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Counter columns that may be incremented.
const COUNTERS: &[&str] = &["items_processed", "api_calls", "export_count"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub owner_id: String,
    pub period_start: String,
    pub period_end: String,
    pub items_processed: i64,
    pub api_calls: i64,
    pub export_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl UsageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            owner_id: row.get("owner_id")?,
            period_start: row.get("period_start")?,
            period_end: row.get("period_end")?,
            items_processed: row.get("items_processed")?,
            api_calls: row.get("api_calls")?,
            export_count: row.get("export_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

}

fn check_counter(column: &str) -> Result<(), DatabaseError> {
    if COUNTERS.contains(&column) {
        Ok(())
    } else {
        Err(DatabaseError::Corrupt {
            table: "usage_records",
            reason: format!("unknown counter column '{}'", column),
        })
    }
}

/// Finds the record for an owner's period.
pub fn find(
    db: &Database,
    owner_id: &str,
    period_start: &str,
) -> Result<Option<UsageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM usage_records WHERE owner_id = ?1 AND period_start = ?2",
                params![owner_id, period_start],
                UsageRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns the record for an owner's period, creating a zeroed one if absent.
pub fn ensure(
    db: &Database,
    owner_id: &str,
    period_start: &str,
    period_end: &str,
    now: &str,
) -> Result<UsageRow, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO usage_records (owner_id, period_start, period_end,
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![owner_id, period_start, period_end, now],
        )?;
        if inserted == 1 {
            log::debug!(
                "Opened usage record for {} starting {}",
                owner_id,
                period_start
            );
        }
        let row = conn.query_row(
            "SELECT * FROM usage_records WHERE owner_id = ?1 AND period_start = ?2",
            params![owner_id, period_start],
            UsageRow::from_row,
        )?;
        Ok(row)
    })
}

/// Unconditionally adds `amount` to a counter. Returns false if the record
/// does not exist.
pub fn increment(
    db: &Database,
    owner_id: &str,
    period_start: &str,
    column: &str,
    amount: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    check_counter(column)?;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE usage_records SET {col} = {col} + ?3, updated_at = ?4
             WHERE owner_id = ?1 AND period_start = ?2",
            col = column
        );
        let changed = conn.execute(&sql, params![owner_id, period_start, amount, now])?;
        Ok(changed == 1)
    })
}

/// Adds `amount` to a counter only if the result stays within `limit`
/// (a negative limit means unlimited). Returns whether the increment applied.
pub fn try_increment(
    db: &Database,
    owner_id: &str,
    period_start: &str,
    column: &str,
    amount: i64,
    limit: i64,
    now: &str,
) -> Result<bool, DatabaseError> {
    check_counter(column)?;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE usage_records SET {col} = {col} + ?3, updated_at = ?5
             WHERE owner_id = ?1 AND period_start = ?2 AND (?4 < 0 OR {col} + ?3 <= ?4)",
            col = column
        );
        let changed = conn.execute(&sql, params![owner_id, period_start, amount, limit, now])?;
        Ok(changed == 1)
    })
}

/// Ends the owner's record that contains `at` at `at`, so a period starting
/// there does not overlap it. A record that starts exactly at `at` is
/// stretched to `new_end` instead and keeps its counters. Returns whether a
/// record was changed.
pub fn close_open_period_in(
    conn: &Connection,
    owner_id: &str,
    at: &str,
    new_end: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE usage_records
         SET period_end = CASE WHEN period_start = ?2 THEN ?3 ELSE ?2 END, updated_at = ?4
         WHERE owner_id = ?1 AND period_start <= ?2 AND period_end > ?2",
        params![owner_id, at, new_end, now],
    )?;
    Ok(changed > 0)
}

/// All of an owner's records, most recent period first.
pub fn list_for_owner(db: &Database, owner_id: &str) -> Result<Vec<UsageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM usage_records WHERE owner_id = ?1 ORDER BY period_start DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], UsageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "2026-03-01T00:00:00.000000Z";
    const END: &str = "2026-04-01T00:00:00.000000Z";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_ensure_creates_zeroed_record_once() {
        let db = test_db();
        let first = ensure(&db, "alice", START, END, "t0").unwrap();
        assert_eq!(first.items_processed, 0);
        assert_eq!(first.api_calls, 0);
        assert_eq!(first.export_count, 0);

        increment(&db, "alice", START, "api_calls", 4, "t1").unwrap();
        let second = ensure(&db, "alice", START, END, "t2").unwrap();
        assert_eq!(second.api_calls, 4);
        assert_eq!(second.created_at, "t0");
        assert_eq!(list_for_owner(&db, "alice").unwrap().len(), 1);
    }

    #[test]
    fn test_increment_missing_record() {
        let db = test_db();
        assert!(!increment(&db, "nobody", START, "api_calls", 1, "t").unwrap());
    }

    #[test]
    fn test_unknown_counter_rejected() {
        let db = test_db();
        ensure(&db, "alice", START, END, "t0").unwrap();
        let result = increment(&db, "alice", START, "credits; DROP TABLE x", 1, "t");
        assert!(matches!(result, Err(DatabaseError::Corrupt { .. })));
    }

    #[test]
    fn test_try_increment_respects_limit() {
        let db = test_db();
        ensure(&db, "alice", START, END, "t0").unwrap();

        assert!(try_increment(&db, "alice", START, "items_processed", 3, 5, "t").unwrap());
        assert!(try_increment(&db, "alice", START, "items_processed", 2, 5, "t").unwrap());
        assert!(!try_increment(&db, "alice", START, "items_processed", 1, 5, "t").unwrap());

        let row = find(&db, "alice", START).unwrap().unwrap();
        assert_eq!(row.items_processed, 5);
    }

    #[test]
    fn test_try_increment_unlimited() {
        let db = test_db();
        ensure(&db, "alice", START, END, "t0").unwrap();
        assert!(try_increment(&db, "alice", START, "export_count", 10_000, -1, "t").unwrap());
        assert_eq!(
            find(&db, "alice", START).unwrap().unwrap().export_count,
            Some(10_000)
        );
    }

    #[test]
    fn test_list_for_owner_most_recent_first() {
        let db = test_db();
        ensure(&db, "alice", START, END, "t0").unwrap();
        ensure(&db, "alice", END, "2026-05-01T00:00:00.000000Z", "t1").unwrap();

        let rows = list_for_owner(&db, "alice").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].period_start, END);
        assert_eq!(rows[1].period_end, END);
    }

    #[test]
    fn test_close_open_period() {
        let db = test_db();
        let mid = "2026-03-12T00:00:00.000000Z";
        ensure(&db, "alice", START, END, "t0").unwrap();
        increment(&db, "alice", START, "items_processed", 7, "t1").unwrap();

        let new_end = "2026-04-12T00:00:00.000000Z";
        let closed = db
            .with_conn(|conn| close_open_period_in(conn, "alice", mid, new_end, "t2"))
            .unwrap();
        assert!(closed);
        let row = find(&db, "alice", START).unwrap().unwrap();
        assert_eq!(row.period_end, mid);
        assert_eq!(row.items_processed, 7);

        // Nothing contains the boundary any more.
        let again = db
            .with_conn(|conn| close_open_period_in(conn, "alice", mid, END, "t3"))
            .unwrap();
        assert!(!again);
    }

    #[test]
    fn test_close_at_period_start_keeps_the_record() {
        let db = test_db();
        let new_end = "2026-04-05T00:00:00.000000Z";
        ensure(&db, "alice", START, END, "t0").unwrap();
        db.with_conn(|conn| close_open_period_in(conn, "alice", START, new_end, "t1"))
            .unwrap();
        assert_eq!(find(&db, "alice", START).unwrap().unwrap().period_end, new_end);
    }
}
