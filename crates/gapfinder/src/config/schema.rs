use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub jobs: JobSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            pipeline: PipelineSettings::default(),
            jobs: JobSettings::default(),
            rate_limit: RateLimitSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.gapfinder/data/gapfinder.db` when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_max_items_per_run")]
    pub max_items_per_run: usize,
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,
    #[serde(default = "default_max_raw_content_length")]
    pub max_raw_content_length: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_analyze_timeout_ms")]
    pub analyze_timeout_ms: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_items_per_run() -> usize {
    100
}

fn default_max_url_length() -> usize {
    2048
}

fn default_max_raw_content_length() -> usize {
    500_000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_analyze_timeout_ms() -> u64 {
    60_000
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_items_per_run: default_max_items_per_run(),
            max_url_length: default_max_url_length(),
            max_raw_content_length: default_max_raw_content_length(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            analyze_timeout_ms: default_analyze_timeout_ms(),
            fetch_retries: default_fetch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
}

fn default_worker_count() -> usize {
    2
}

fn default_persist_retries() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    50
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            persist_retries: default_persist_retries(),
            persist_backoff_ms: default_persist_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_submissions")]
    pub max_submissions: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_submissions() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_submissions: default_max_submissions(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
