//! Subscription tiers and their static usage limits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A limit of `UNLIMITED` never denies and is never divided by.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Team,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Team => "team",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                items_processed: 50,
                api_calls: 100,
                export_count: 5,
                findings_per_item: 10,
            },
            Tier::Pro => TierLimits {
                items_processed: 500,
                api_calls: 1000,
                export_count: 50,
                findings_per_item: 50,
            },
            Tier::Team => TierLimits {
                items_processed: 2000,
                api_calls: 5000,
                export_count: 200,
                findings_per_item: UNLIMITED,
            },
            Tier::Enterprise => TierLimits {
                items_processed: UNLIMITED,
                api_calls: UNLIMITED,
                export_count: UNLIMITED,
                findings_per_item: UNLIMITED,
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "team" => Ok(Tier::Team),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// A metered resource. Each maps to one counter of the usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    ItemsProcessed,
    ApiCalls,
    ExportCount,
}

impl Resource {
    pub const ALL: [Resource; 3] = [
        Resource::ItemsProcessed,
        Resource::ApiCalls,
        Resource::ExportCount,
    ];

    /// Column of `usage_records` holding this counter.
    pub fn column(&self) -> &'static str {
        match self {
            Resource::ItemsProcessed => "items_processed",
            Resource::ApiCalls => "api_calls",
            Resource::ExportCount => "export_count",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Per-period limits of one tier. `UNLIMITED` (−1) means no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub items_processed: i64,
    pub api_calls: i64,
    pub export_count: i64,
    /// Informational; exceeding it is logged, never enforced.
    pub findings_per_item: i64,
}

impl TierLimits {
    pub fn for_resource(&self, resource: Resource) -> i64 {
        match resource {
            Resource::ItemsProcessed => self.items_processed,
            Resource::ApiCalls => self.api_calls,
            Resource::ExportCount => self.export_count,
        }
    }
}

/// Share of a limit used, as a whole percentage clipped to `0..=100`.
/// Unlimited reports 0; a zero limit reports 100.
pub fn usage_percent(current: i64, limit: i64) -> u8 {
    if limit < 0 {
        return 0;
    }
    if limit == 0 {
        return 100;
    }
    let ratio = (current as f64 / limit as f64 * 100.0).round();
    ratio.clamp(0.0, 100.0) as u8
}

/// Human-readable limit for display.
pub fn format_limit(limit: i64) -> String {
    if limit < 0 {
        "Unlimited".to_string()
    } else {
        limit.to_string()
    }
}
