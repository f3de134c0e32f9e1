//! Admission control: may an owner use `amount` more of a resource?

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::ledger::UsageLedger;
use super::subscription::{Subscription, SubscriptionStore};
use super::tiers::{format_limit, usage_percent, Resource, Tier, UNLIMITED};

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub allowed: bool,
    /// What is left after this request (when allowed) or before it (when
    /// denied). `-1` when unlimited.
    pub remaining: i64,
    pub limit: i64,
    pub reset_at: DateTime<Utc>,
    pub upgrade_required: bool,
}

impl QuotaCheck {
    /// Evaluates a request of `amount` against a counter at `current`.
    pub fn evaluate(
        tier: Tier,
        limit: i64,
        current: i64,
        amount: i64,
        reset_at: DateTime<Utc>,
    ) -> Self {
        if limit == UNLIMITED {
            return Self {
                allowed: true,
                remaining: UNLIMITED,
                limit,
                reset_at,
                upgrade_required: false,
            };
        }

        let projected = current + amount;
        let allowed = projected <= limit;
        let remaining = if allowed {
            (limit - projected).max(0)
        } else {
            (limit - current).max(0)
        };
        Self {
            allowed,
            remaining,
            limit,
            reset_at,
            upgrade_required: !allowed && tier != Tier::Enterprise,
        }
    }
}

/// One resource line of a usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub resource: Resource,
    pub current: i64,
    pub limit: i64,
    pub display_limit: String,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub owner_id: String,
    pub tier: Tier,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub resources: Vec<ResourceUsage>,
    pub findings_per_item: i64,
}

pub struct QuotaGate {
    ledger: UsageLedger,
}

impl QuotaGate {
    pub fn new(ledger: UsageLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionStore> {
        self.ledger.subscriptions()
    }

    /// Read-only decision. Does not consume anything; pair with [`record`]
    /// (not atomic) or use [`try_consume`] instead.
    ///
    /// [`record`]: QuotaGate::record
    /// [`try_consume`]: QuotaGate::try_consume
    pub fn admit(&self, owner_id: &str, resource: Resource, amount: u32) -> Result<QuotaCheck> {
        let (sub, record) = self.ledger.roll_period(owner_id)?;
        let limit = sub.tier.limits().for_resource(resource);
        let check = QuotaCheck::evaluate(
            sub.tier,
            limit,
            record.counter(resource),
            i64::from(amount),
            sub.current_period_end,
        );
        log_decision(owner_id, resource, &sub, &check);
        Ok(check)
    }

    /// Counts `amount` against the current period regardless of the limit.
    pub fn record(&self, owner_id: &str, resource: Resource, amount: u32) -> Result<()> {
        let record = self.ledger.record(owner_id, resource, amount)?;
        log::debug!(
            "Recorded {} {} for {} (now {})",
            amount,
            resource,
            owner_id,
            record.counter(resource)
        );
        Ok(())
    }

    /// Checks and consumes in one conditional update: the counter grows only
    /// if it stays within the limit.
    pub fn try_consume(
        &self,
        owner_id: &str,
        resource: Resource,
        amount: u32,
    ) -> Result<QuotaCheck> {
        let (sub, record) = self.ledger.roll_period(owner_id)?;
        let limit = sub.tier.limits().for_resource(resource);
        let (applied, after) =
            self.ledger
                .try_increment(owner_id, record.period_start, resource, amount, limit)?;

        let requested = i64::from(amount);
        let current = if applied {
            after.counter(resource) - requested
        } else {
            after.counter(resource)
        };
        let mut check =
            QuotaCheck::evaluate(sub.tier, limit, current, requested, sub.current_period_end);
        if !applied && check.allowed {
            check.allowed = false;
            check.upgrade_required = sub.tier != Tier::Enterprise;
        }
        log_decision(owner_id, resource, &sub, &check);
        Ok(check)
    }

    /// Rolls the owner's period forward if it has ended.
    pub fn roll_period(&self, owner_id: &str) -> Result<Subscription> {
        let (sub, _) = self.ledger.roll_period(owner_id)?;
        Ok(sub)
    }

    /// Every counter of the current period with its limit and percentage.
    pub fn usage_summary(&self, owner_id: &str) -> Result<UsageSummary> {
        let (sub, record) = self.ledger.roll_period(owner_id)?;
        let limits = sub.tier.limits();
        let resources = Resource::ALL
            .iter()
            .map(|&resource| {
                let current = record.counter(resource);
                let limit = limits.for_resource(resource);
                ResourceUsage {
                    resource,
                    current,
                    limit,
                    display_limit: format_limit(limit),
                    percent: usage_percent(current, limit),
                }
            })
            .collect();

        Ok(UsageSummary {
            owner_id: owner_id.to_string(),
            tier: sub.tier,
            period_start: sub.current_period_start,
            period_end: sub.current_period_end,
            resources,
            findings_per_item: limits.findings_per_item,
        })
    }
}

fn log_decision(owner_id: &str, resource: Resource, sub: &Subscription, check: &QuotaCheck) {
    if check.allowed {
        log::debug!(
            "Quota ok for {} on {} ({} tier, {} remaining)",
            owner_id,
            resource,
            sub.tier,
            check.remaining
        );
    } else {
        log::info!(
            "Quota denied for {} on {} ({} tier, limit {})",
            owner_id,
            resource,
            sub.tier,
            check.limit
        );
    }
}
