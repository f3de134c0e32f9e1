//! Subscriptions: the billing state machine and its store.
//!
//! An owner without a stored subscription is on Free for the calendar month.
//! Stored subscriptions roll forward by whole months, each period starting
//! where the previous one ended.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::subscription_repo::{self, SubscriptionRow};
use crate::db::usage_repo;
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::{Result, SubscriptionError};

use super::tiers::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

/// Events from the external billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEvent {
    PaymentSucceeded,
    PaymentFailed,
    CancelRequested,
}

impl fmt::Display for BillingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BillingEvent::PaymentSucceeded => "payment_succeeded",
            BillingEvent::PaymentFailed => "payment_failed",
            BillingEvent::CancelRequested => "cancel_requested",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// `None` for the implicit Free subscription, which is never stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub owner_id: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

impl Subscription {
    /// The implicit Free subscription for the calendar month containing `now`.
    pub fn free(owner_id: &str, now: DateTime<Utc>) -> Self {
        let start = month_start(now);
        Self {
            id: None,
            owner_id: owner_id.to_string(),
            tier: Tier::Free,
            status: SubscriptionStatus::Active,
            current_period_start: start,
            current_period_end: add_months(start, 1),
            cancel_at_period_end: false,
        }
    }

    /// Applies a billing event, returning the next state.
    pub fn apply(&self, event: BillingEvent) -> std::result::Result<Self, SubscriptionError> {
        if self.tier == Tier::Free {
            return Err(SubscriptionError::FreeTier);
        }

        use BillingEvent::*;
        use SubscriptionStatus::*;
        let status = match (self.status, event) {
            (Trialing | Active | PastDue, PaymentSucceeded) => Active,
            (Trialing | Active | PastDue, PaymentFailed) => PastDue,
            (Trialing | Active | PastDue, CancelRequested) => Canceled,
            (Canceled, _) => {
                return Err(SubscriptionError::InvalidTransition {
                    from: self.status.to_string(),
                    event: event.to_string(),
                })
            }
        };

        let mut next = self.clone();
        next.status = status;
        next.cancel_at_period_end = status == Canceled;
        Ok(next)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.current_period_start <= at && at < self.current_period_end
    }

    fn from_row(row: &SubscriptionRow) -> std::result::Result<Self, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::Corrupt {
            table: "subscriptions",
            reason,
        };
        Ok(Self {
            id: Some(row.id),
            owner_id: row.owner_id.clone(),
            tier: row.tier.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            current_period_start: parse_timestamp(&row.current_period_start, "subscriptions")?,
            current_period_end: parse_timestamp(&row.current_period_end, "subscriptions")?,
            cancel_at_period_end: row.cancel_at_period_end,
        })
    }

    fn to_row(&self, now: DateTime<Utc>) -> SubscriptionRow {
        let now = format_timestamp(now);
        SubscriptionRow {
            id: self.id.unwrap_or_default(),
            owner_id: self.owner_id.clone(),
            tier: self.tier.as_str().to_string(),
            status: self.status.as_str().to_string(),
            current_period_start: format_timestamp(self.current_period_start),
            current_period_end: format_timestamp(self.current_period_end),
            cancel_at_period_end: self.cancel_at_period_end,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

pub(crate) fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

pub(crate) fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Reads and writes the effective subscription of each owner.
pub struct SubscriptionStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SubscriptionStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The effective subscription as stored, without rolling its period.
    pub fn current(&self, owner_id: &str) -> Result<Subscription> {
        match subscription_repo::latest_for_owner(&self.db, owner_id)? {
            Some(row) => Ok(Subscription::from_row(&row)?),
            None => Ok(Subscription::free(owner_id, self.clock.now())),
        }
    }

    /// Starts a new subscription whose first period begins now. It becomes
    /// the owner's effective subscription. The period it supersedes, and the
    /// usage record of that period, end at the same instant.
    pub fn subscribe(
        &self,
        owner_id: &str,
        tier: Tier,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let mut sub = Subscription {
            id: None,
            owner_id: owner_id.to_string(),
            tier,
            status,
            current_period_start: now,
            current_period_end: add_months(now, 1),
            cancel_at_period_end: false,
        };
        let stamp = format_timestamp(now);
        let end = format_timestamp(sub.current_period_end);
        let row = sub.to_row(now);
        let id = self.db.with_transaction(|conn| {
            subscription_repo::close_periods_in(conn, owner_id, &stamp)?;
            if usage_repo::close_open_period_in(conn, owner_id, &stamp, &end, &stamp)? {
                log::debug!("Closed usage period of {} at {}", owner_id, stamp);
            }
            subscription_repo::insert_in(conn, &row)
        })?;
        sub.id = Some(id);
        log::info!("Owner {} subscribed to {} ({})", owner_id, tier, status);
        Ok(sub)
    }

    /// Applies a billing event to the owner's effective subscription.
    pub fn apply_event(&self, owner_id: &str, event: BillingEvent) -> Result<Subscription> {
        let current = self.current(owner_id)?;
        let next = current.apply(event)?;
        if next.id.is_some() {
            subscription_repo::update(&self.db, &next.to_row(self.clock.now()))?;
        }
        log::info!(
            "Subscription of {} moved {} -> {} on {}",
            owner_id,
            current.status,
            next.status,
            event
        );
        Ok(next)
    }

    /// Moves a stored subscription whose period has ended forward until the
    /// period contains now. A canceled subscription is replaced by Free.
    pub fn advance_period(&self, owner_id: &str) -> Result<Subscription> {
        let now = self.clock.now();
        let current = self.current(owner_id)?;
        if current.id.is_none() || now < current.current_period_end {
            return Ok(current);
        }

        let (start, end) = next_period_containing(current.current_period_end, now);

        if current.status == SubscriptionStatus::Canceled || current.cancel_at_period_end {
            let free = Subscription {
                id: None,
                owner_id: owner_id.to_string(),
                tier: Tier::Free,
                status: SubscriptionStatus::Active,
                current_period_start: start,
                current_period_end: end,
                cancel_at_period_end: false,
            };
            let id = subscription_repo::insert(&self.db, &free.to_row(now))?;
            log::info!(
                "Canceled {} subscription of {} ended, falling back to free",
                current.tier,
                owner_id
            );
            return Ok(Subscription { id: Some(id), ..free });
        }

        let mut rolled = current;
        rolled.current_period_start = start;
        rolled.current_period_end = end;
        subscription_repo::update(&self.db, &rolled.to_row(now))?;
        log::info!(
            "Rolled {} period of {} to {}",
            rolled.tier,
            owner_id,
            format_timestamp(start)
        );
        Ok(rolled)
    }
}

/// Steps month by month from `from` until the period contains `now`.
fn next_period_containing(
    from: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let mut start = from;
    let mut end = add_months(start, 1);
    while end <= now && end > start {
        start = end;
        end = add_months(start, 1);
    }
    (start, end)
}
