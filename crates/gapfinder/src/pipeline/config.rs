use std::time::Duration;

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Limits and timeouts shared by every pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_items_per_run: usize,
    pub max_url_length: usize,
    pub max_raw_content_length: usize,
    pub fetch_timeout: Duration,
    pub analyze_timeout: Duration,
    pub fetch_retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let p = &config.pipeline;
        Self {
            max_items_per_run: p.max_items_per_run,
            max_url_length: p.max_url_length,
            max_raw_content_length: p.max_raw_content_length,
            fetch_timeout: Duration::from_millis(p.fetch_timeout_ms),
            analyze_timeout: Duration::from_millis(p.analyze_timeout_ms),
            fetch_retry: RetryPolicy::new(p.fetch_retries, p.retry_backoff_ms),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
