//! Subscription tiers, usage accounting and admission control.

pub mod gate;
pub mod ledger;
pub mod subscription;
pub mod tiers;

pub use gate::{QuotaCheck, QuotaGate, ResourceUsage, UsageSummary};
pub use ledger::{UsageLedger, UsageRecord};
pub use subscription::{BillingEvent, Subscription, SubscriptionStatus, SubscriptionStore};
pub use tiers::{format_limit, usage_percent, Resource, Tier, TierLimits, UNLIMITED};
