use std::path::Path;

use secrecy::SecretString;

use crate::config::schema::{EngineConfig, ProviderConfig, ProviderKind};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/engine-config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: EngineConfig = serde_json::from_value(json_value)?;

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

pub(crate) fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let provider = &config.provider;
    if !(0.0..=2.0).contains(&provider.temperature) {
        return Err(ConfigError::Validation {
            message: format!(
                "provider.temperature must be within [0, 2], got {}",
                provider.temperature
            ),
        });
    }
    if provider.max_tokens == 0 {
        return Err(ConfigError::Validation {
            message: "provider.maxTokens must be positive".to_string(),
        });
    }

    if config.queue.workers == 0 || config.queue.capacity == 0 {
        return Err(ConfigError::Validation {
            message: "queue.workers and queue.capacity must be positive".to_string(),
        });
    }

    if config.entities.max_entities == 0 {
        return Err(ConfigError::Validation {
            message: "entities.maxEntities must be positive".to_string(),
        });
    }

    if config.generation.event_buffer == 0 {
        return Err(ConfigError::Validation {
            message: "generation.eventBuffer must be positive".to_string(),
        });
    }

    Ok(())
}

/// Reads the provider API key from the environment variable named in the config.
///
/// The scripted provider needs no key and always resolves to an empty secret.
pub fn resolve_api_key(provider: &ProviderConfig) -> Result<SecretString, ConfigError> {
    if provider.kind == ProviderKind::Scripted {
        return Ok(SecretString::from(String::new()));
    }

    match std::env::var(&provider.api_key_env) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::SecretNotFound(provider.api_key_env.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.entities.min_text_length, 100);
        assert_eq!(config.entities.max_entities, 10);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.provider.kind, ProviderKind::Anthropic);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "version": "1.0",
            "database": {"path": ":memory:"},
            "provider": {"kind": "scripted", "defaultModel": "test-model", "temperature": 0.2},
            "entities": {"minTextLength": 50, "maxEntities": 5},
            "queue": {"workers": 4, "capacity": 16, "maxRetries": 1, "retryBaseDelayMs": 10},
            "cache": {"ttlSecs": 60, "maxCapacity": 100},
            "logging": {"filter": "debug", "json": true}
        }"#;
        let config = load_config_from_str(json).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Scripted);
        assert_eq!(config.provider.default_model, "test-model");
        assert_eq!(config.entities.min_text_length, 50);
        assert_eq!(config.queue.workers, 4);
        assert!(config.logging.json);
        assert_eq!(config.database.path.as_deref(), Some(":memory:"));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let result = load_config_from_str(r#"{"version": "1.0", "bogus": true}"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unbounded_retry_settings_rejected_by_schema() {
        let retries = load_config_from_str(r#"{"version": "1.0", "queue": {"maxRetries": 4294967295}}"#);
        assert!(matches!(retries, Err(ConfigError::SchemaValidation { .. })));

        let delay = load_config_from_str(
            r#"{"version": "1.0", "queue": {"retryBaseDelayMs": 18446744073709551615}}"#,
        );
        assert!(matches!(delay, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let result = load_config_from_str(r#"{"version": "2.0"}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let result = load_config_from_str(
            r#"{"version": "1.0", "provider": {"kind": "anthropic", "temperature": 3.5}}"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/finreport.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    #[serial]
    fn test_resolve_api_key_from_env() {
        let provider = ProviderConfig {
            api_key_env: "FINREPORT_TEST_KEY".to_string(),
            ..Default::default()
        };
        std::env::set_var("FINREPORT_TEST_KEY", "sk-test");
        let key = resolve_api_key(&provider).unwrap();
        assert_eq!(key.expose_secret(), "sk-test");
        std::env::remove_var("FINREPORT_TEST_KEY");
    }

    #[test]
    #[serial]
    fn test_resolve_api_key_missing() {
        let provider = ProviderConfig {
            api_key_env: "FINREPORT_MISSING_KEY".to_string(),
            ..Default::default()
        };
        std::env::remove_var("FINREPORT_MISSING_KEY");
        let result = resolve_api_key(&provider);
        assert!(matches!(result, Err(ConfigError::SecretNotFound(_))));
    }

    #[test]
    fn test_scripted_provider_needs_no_key() {
        let provider = ProviderConfig {
            kind: ProviderKind::Scripted,
            api_key_env: "FINREPORT_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert!(resolve_api_key(&provider).is_ok());
    }
}
