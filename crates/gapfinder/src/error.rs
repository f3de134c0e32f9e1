use std::path::PathBuf;
use thiserror::Error;

use crate::quota::{QuotaCheck, Resource};

#[derive(Error, Debug)]
pub enum GapfinderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Quota exceeded for {resource}: {remaining} remaining of {limit}")]
    QuotaExceeded {
        resource: Resource,
        remaining: i64,
        limit: i64,
        check: QuotaCheck,
    },

    #[error("Rate limit exceeded for '{action}', retry in {retry_after_secs}s")]
    RateLimited {
        action: String,
        retry_after_secs: u64,
    },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::db::DatabaseError),

    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl GapfinderError {
    /// Builds the denial error surfaced to callers from a failed quota check.
    pub fn quota_exceeded(resource: Resource, check: QuotaCheck) -> Self {
        Self::QuotaExceeded {
            resource,
            remaining: check.remaining,
            limit: check.limit,
            check,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Rejects a whole submission before any item starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Submission contains no items")]
    EmptyBatch,

    #[error("Submission has {count} items, the maximum is {max}")]
    TooManyItems { count: usize, max: usize },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("URL is {len} characters long, the maximum is {max}")]
    UrlTooLong { len: usize, max: usize },

    #[error("Owner id must not be empty")]
    EmptyOwner,
}

/// Failure of the fetch stage. Scoped to a single item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Server responded with HTTP {status}")]
    Status { status: u16 },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Document has no content")]
    EmptyContent,
}

impl FetchError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Request(_) => true,
            FetchError::Status { status } => *status == 429 || *status >= 500,
            FetchError::EmptyContent => false,
        }
    }
}

/// Failure of the extraction stage. Scoped to a single item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Analysis timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("Extractor returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Free tier subscriptions do not accept billing events")]
    FreeTier,

    #[error("Cannot apply '{event}' to a subscription in state '{from}'")]
    InvalidTransition { from: String, event: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid item transition from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

pub type Result<T> = std::result::Result<T, GapfinderError>;
