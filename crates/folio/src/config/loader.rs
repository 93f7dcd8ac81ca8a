use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

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

/// Checks the rules the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if let Err(message) = config.priorities.validate() {
        return Err(ConfigError::Validation { message });
    }

    if config.queue.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "queue.batch_size must be at least 1".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.queue.batch_size, 25);
        assert_eq!(config.priorities.page, 5);
        assert_eq!(config.output.max_basename_length, 200);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/folio/folio.db" },
            "output": { "root": "/srv", "max_basename_length": 80 },
            "queue": { "batch_size": 10, "max_batches": 50, "stuck_after_secs": 60 },
            "priorities": { "page": 10 },
            "worker_count": 4
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database.path.as_deref(), Some("/var/lib/folio/folio.db"));
        assert_eq!(config.output.root, "/srv");
        assert_eq!(config.queue.max_batches, Some(50));
        assert_eq!(config.priorities.page, 10);
        assert_eq!(config.priorities.index, 2);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "input_directory": "/in" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_version_fails_schema() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_zero_batch_size_fails_schema() {
        let result = load_config_from_str(r#"{ "version": "1.0", "queue": { "batch_size": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_reordered_priorities_fail_validation() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "priorities": { "index": 7, "page": 6 } }"#,
        );
        match result {
            Err(ConfigError::Validation { message }) => assert!(message.contains("'archive'")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/definitely/not/here/folio.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("folio.json");
        std::fs::write(&path, r#"{ "version": "1.0", "worker_count": 2 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.worker_count, 2);
    }
}
