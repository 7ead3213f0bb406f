use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::message::is_valid_application_name;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

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

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be > 0".to_string(),
        });
    }

    let deposit = &config.deposit;
    if deposit.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "deposit.poll_interval_ms must be > 0".to_string(),
        });
    }
    if deposit.dispatch_timeout_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "deposit.dispatch_timeout_secs must be > 0 when set".to_string(),
        });
    }

    if let Err(e) = glob::Pattern::new(&deposit.job_file_pattern) {
        return Err(ConfigError::InvalidPattern {
            pattern: deposit.job_file_pattern.clone(),
            reason: e.to_string(),
        });
    }

    let mut seen_roots = HashSet::new();
    for root in &deposit.roots {
        let path = root.resolved_path();
        if !seen_roots.insert(path.clone()) {
            return Err(ConfigError::InvalidDepositRoot {
                path,
                reason: "Duplicate deposit root".to_string(),
            });
        }
        if !is_valid_application_name(&root.application_name) {
            return Err(ConfigError::InvalidDepositRoot {
                path,
                reason: format!("Invalid application name '{}'", root.application_name),
            });
        }
    }

    Ok(())
}
