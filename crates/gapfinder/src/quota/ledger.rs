//! Usage ledger: durable, period-scoped counters per owner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::usage_repo::{self, UsageRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::Result;

use super::subscription::{Subscription, SubscriptionStore};
use super::tiers::Resource;

/// Counters of one owner for one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub owner_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub items_processed: i64,
    pub api_calls: i64,
    pub export_count: i64,
}

impl UsageRecord {
    pub fn counter(&self, resource: Resource) -> i64 {
        match resource {
            Resource::ItemsProcessed => self.items_processed,
            Resource::ApiCalls => self.api_calls,
            Resource::ExportCount => self.export_count,
        }
    }

    fn from_row(row: &UsageRow) -> std::result::Result<Self, DatabaseError> {
        Ok(Self {
            owner_id: row.owner_id.clone(),
            period_start: parse_timestamp(&row.period_start, "usage_records")?,
            period_end: parse_timestamp(&row.period_end, "usage_records")?,
            items_processed: row.items_processed,
            api_calls: row.api_calls,
            export_count: row.export_count,
        })
    }
}

pub struct UsageLedger {
    db: Database,
    subscriptions: Arc<SubscriptionStore>,
}

impl UsageLedger {
    pub fn new(db: Database, subscriptions: Arc<SubscriptionStore>) -> Self {
        Self { db, subscriptions }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionStore> {
        &self.subscriptions
    }

    /// Brings the owner's subscription period up to date and returns it with
    /// the matching usage record, creating a zeroed record on first use.
    /// Records of earlier periods are left untouched.
    pub fn roll_period(&self, owner_id: &str) -> Result<(Subscription, UsageRecord)> {
        let sub = self.subscriptions.advance_period(owner_id)?;
        let now = format_timestamp(self.subscriptions.clock().now());
        let row = usage_repo::ensure(
            &self.db,
            owner_id,
            &format_timestamp(sub.current_period_start),
            &format_timestamp(sub.current_period_end),
            &now,
        )?;
        let record = UsageRecord::from_row(&row)?;
        Ok((sub, record))
    }

    /// Adds `amount` to the current period's counter unconditionally.
    pub fn record(&self, owner_id: &str, resource: Resource, amount: u32) -> Result<UsageRecord> {
        let (_, record) = self.roll_period(owner_id)?;
        let start = format_timestamp(record.period_start);
        let now = format_timestamp(self.subscriptions.clock().now());
        usage_repo::increment(
            &self.db,
            owner_id,
            &start,
            resource.column(),
            i64::from(amount),
            &now,
        )?;
        self.reload(owner_id, &start)
    }

    /// Adds `amount` only if the counter stays within `limit`. Returns
    /// whether it applied, with the record as it stands afterwards.
    pub fn try_increment(
        &self,
        owner_id: &str,
        period_start: DateTime<Utc>,
        resource: Resource,
        amount: u32,
        limit: i64,
    ) -> Result<(bool, UsageRecord)> {
        let start = format_timestamp(period_start);
        let now = format_timestamp(self.subscriptions.clock().now());
        let applied = usage_repo::try_increment(
            &self.db,
            owner_id,
            &start,
            resource.column(),
            i64::from(amount),
            limit,
            &now,
        )?;
        Ok((applied, self.reload(owner_id, &start)?))
    }

    /// All of an owner's records, most recent period first.
    pub fn history(&self, owner_id: &str) -> Result<Vec<UsageRecord>> {
        let rows = usage_repo::list_for_owner(&self.db, owner_id)?;
        let records = rows
            .iter()
            .map(UsageRecord::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn reload(&self, owner_id: &str, period_start: &str) -> Result<UsageRecord> {
        let row = usage_repo::find(&self.db, owner_id, period_start)?.ok_or_else(|| {
            DatabaseError::Corrupt {
                table: "usage_records",
                reason: format!("record for {} at {} vanished", owner_id, period_start),
            }
        })?;
        Ok(UsageRecord::from_row(&row)?)
    }
}
