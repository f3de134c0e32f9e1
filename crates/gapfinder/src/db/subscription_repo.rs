//! Subscription repository. The most recently created row per owner is the
//! effective subscription; older rows are kept as history.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRow {
    pub id: i64,
    pub owner_id: String,
    pub tier: String,
    pub status: String,
    pub current_period_start: String,
    pub current_period_end: String,
    pub cancel_at_period_end: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl SubscriptionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            tier: row.get("tier")?,
            status: row.get("status")?,
            current_period_start: row.get("current_period_start")?,
            current_period_end: row.get("current_period_end")?,
            cancel_at_period_end: row.get("cancel_at_period_end")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a subscription and returns its row id. The `id` field is ignored.
pub fn insert(db: &Database, sub: &SubscriptionRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_in(conn, sub))
}

pub fn insert_in(conn: &Connection, sub: &SubscriptionRow) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO subscriptions (owner_id, tier, status, current_period_start,
         current_period_end, cancel_at_period_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sub.owner_id,
            sub.tier,
            sub.status,
            sub.current_period_start,
            sub.current_period_end,
            sub.cancel_at_period_end,
            sub.created_at,
            sub.updated_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Ends every period of the owner still open at `at`.
pub fn close_periods_in(
    conn: &Connection,
    owner_id: &str,
    at: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE subscriptions SET current_period_end = ?2, updated_at = ?2
         WHERE owner_id = ?1 AND current_period_end > ?2",
        params![owner_id, at],
    )?;
    Ok(changed)
}

/// Returns the effective subscription for an owner.
pub fn latest_for_owner(
    db: &Database,
    owner_id: &str,
) -> Result<Option<SubscriptionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM subscriptions WHERE owner_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![owner_id],
                SubscriptionRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Overwrites the mutable fields of a subscription.
pub fn update(db: &Database, sub: &SubscriptionRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE subscriptions SET tier = ?2, status = ?3, current_period_start = ?4,
             current_period_end = ?5, cancel_at_period_end = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                sub.id,
                sub.tier,
                sub.status,
                sub.current_period_start,
                sub.current_period_end,
                sub.cancel_at_period_end,
                sub.updated_at,
            ],
        )?;
        Ok(())
    })
}
