use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::Finding;
use crate::db::item_repo::ItemRow;
use crate::db::job_repo::JobRow;
use crate::db::{parse_timestamp, DatabaseError};
use crate::pipeline::ItemStatus;
use crate::quota::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// What a job is billed as. Both kinds run the same fetch and analyze
/// stages per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Analysis,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Analysis => "analysis",
            JobKind::Export => "export",
        }
    }

    /// The quota counter a job of this kind consumes, one unit per item.
    pub fn resource(&self) -> Resource {
        match self {
            JobKind::Analysis => Resource::ItemsProcessed,
            JobKind::Export => Resource::ExportCount,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(JobKind::Analysis),
            "export" => Ok(JobKind::Export),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}

/// Queue priority. Ordering follows scheduling order: `High` is greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            other => Err(format!("unknown job priority '{}'", other)),
        }
    }
}

/// `round(completed / total * 100)`. An empty job is 100% once completed.
pub fn progress_percent(status: JobStatus, completed: i64, total: i64) -> u8 {
    if total <= 0 {
        return if status == JobStatus::Completed { 100 } else { 0 };
    }
    let ratio = completed.clamp(0, total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

/// Snapshot of a durable job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    pub owner_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub total_items: i64,
    /// Items that reached a terminal state, failed ones included.
    pub completed_items: i64,
    pub failed_items: i64,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

fn corrupt(reason: String) -> DatabaseError {
    DatabaseError::Corrupt {
        table: "batch_jobs",
        reason,
    }
}

fn parse_optional(s: Option<&str>, table: &'static str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_timestamp(s, table)).transpose()
}

impl BatchJob {
    pub fn from_row(row: &JobRow) -> Result<Self, DatabaseError> {
        let status: JobStatus = row.status.parse().map_err(corrupt)?;
        Ok(Self {
            id: row.id.clone(),
            owner_id: row.owner_id.clone(),
            kind: row.kind.parse().map_err(corrupt)?,
            status,
            priority: row.priority.parse().map_err(corrupt)?,
            total_items: row.total_items,
            completed_items: row.completed_items,
            failed_items: row.failed_items,
            progress_percent: progress_percent(status, row.completed_items, row.total_items),
            created_at: parse_timestamp(&row.created_at, "batch_jobs")?,
            updated_at: parse_timestamp(&row.updated_at, "batch_jobs")?,
            started_at: parse_optional(row.started_at.as_deref(), "batch_jobs")?,
            completed_at: parse_optional(row.completed_at.as_deref(), "batch_jobs")?,
            error_message: row.error_message.clone(),
            result_summary: row.result_summary.clone(),
        })
    }
}

/// Durable per-item result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobItem {
    pub job_id: String,
    pub position: usize,
    pub url: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub updated_at: DateTime<Utc>,
}

impl JobItem {
    pub fn from_row(row: &ItemRow) -> Result<Self, DatabaseError> {
        let item_corrupt = |reason: String| DatabaseError::Corrupt {
            table: "job_items",
            reason,
        };
        let findings = match row.findings.as_deref() {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| item_corrupt(format!("bad findings JSON: {}", e)))?,
            None => Vec::new(),
        };
        Ok(Self {
            job_id: row.job_id.clone(),
            position: usize::try_from(row.position)
                .map_err(|_| item_corrupt(format!("negative position {}", row.position)))?,
            url: row.url.clone(),
            status: row.status.parse().map_err(item_corrupt)?,
            error_reason: row.error_reason.clone(),
            title: row.title.clone(),
            venue: row.venue.clone(),
            findings,
            updated_at: parse_timestamp(&row.updated_at, "job_items")?,
        })
    }
}
