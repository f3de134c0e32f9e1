use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level: {}", config.logging.level),
        });
    }

    if config.pipeline.max_items_per_run == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.max_items_per_run must be at least 1".to_string(),
        });
    }

    if config.jobs.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.worker_count must be at least 1".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.pipeline.max_items_per_run, 100);
        assert_eq!(config.pipeline.fetch_retries, 2);
        assert_eq!(config.jobs.worker_count, 2);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/gapfinder/jobs.db" },
            "pipeline": {
                "max_items_per_run": 20,
                "fetch_timeout_ms": 5000,
                "fetch_retries": 0
            },
            "jobs": { "worker_count": 4 },
            "rate_limit": { "max_submissions": 3, "window_secs": 10 },
            "logging": { "level": "debug", "json": true }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.database.path.as_deref(),
            Some("/var/lib/gapfinder/jobs.db")
        );
        assert_eq!(config.pipeline.max_items_per_run, 20);
        assert_eq!(config.pipeline.fetch_timeout_ms, 5000);
        assert_eq!(config.pipeline.fetch_retries, 0);
        assert_eq!(config.pipeline.max_url_length, 2048);
        assert_eq!(config.jobs.worker_count, 4);
        assert_eq!(config.rate_limit.max_submissions, 3);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 3 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_zero_worker_count_rejected_by_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "jobs": { "worker_count": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unknown_log_level() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "logging": { "level": "loud" } }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gapfinder.json");
        std::fs::write(&path, r#"{ "version": "1.0", "jobs": { "worker_count": 3 } }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.jobs.worker_count, 3);
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/gapfinder.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_malformed_json() {
        let result = load_config_from_str("{ version: 1.0 ");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }
}
