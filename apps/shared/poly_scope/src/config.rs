//! Engine configuration
//!
//! Configuration documents are JSON, validated against the JSON Schema
//! derived from their Rust type before being deserialized.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    IoError(String, #[source] std::io::Error),

    #[error("JSON parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Schema validation failed: {0}")]
    ValidationError(String),

    #[error("Unknown runtime type: {0}")]
    UnknownRuntime(String),
}

/// Trait for types that can be validated against JSON Schema
pub trait Validatable: JsonSchema + for<'de> Deserialize<'de> {
    /// Load and validate from JSON file
    fn from_json_file(path: &str) -> ConfigResult<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_string(), e))?;

        Self::from_json_str(&content)
    }

    /// Load and validate from JSON string
    fn from_json_str(json: &str) -> ConfigResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;

        let schema = schemars::schema_for!(Self);
        let schema_json = serde_json::to_value(&schema)?;

        let compiled = jsonschema::validator_for(&schema_json)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        compiled
            .validate(&value)
            .map_err(|e| ConfigError::ValidationError(format!("{}", e)))?;

        Ok(serde_json::from_value(value)?)
    }

    /// Generate JSON Schema for this type
    fn generate_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Self)
    }

    /// Generate JSON Schema as JSON string
    fn schema_json() -> ConfigResult<String> {
        let schema = Self::generate_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

/// Per-engine limits and labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Polyscript Engine Configuration")]
#[schemars(description = "Limits applied by an engine adapter to its frame and local-reference tables")]
pub struct EngineConfig {
    /// Label used in logs instead of the numeric engine id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Human-readable engine label used in logs")]
    pub name: Option<String>,

    /// Maximum number of simultaneously open frames (engine scopes included)
    #[serde(default = "default_max_frame_depth")]
    #[schemars(description = "Maximum nesting depth of frames", range(min = 1, max = 65536))]
    pub max_frame_depth: usize,

    /// Maximum number of live local references across all open frames
    #[serde(default = "default_max_locals")]
    #[schemars(description = "Maximum number of live local references", range(min = 1))]
    pub max_locals: usize,
}

fn default_max_frame_depth() -> usize {
    256
}

fn default_max_locals() -> usize {
    65536
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_frame_depth: default_max_frame_depth(),
            max_locals: default_max_locals(),
        }
    }
}

impl EngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_frame_depth(mut self, depth: usize) -> Self {
        self.max_frame_depth = depth;
        self
    }

    pub fn with_max_locals(mut self, locals: usize) -> Self {
        self.max_locals = locals;
        self
    }
}

impl Validatable for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_frame_depth, 256);
        assert_eq!(config.max_locals, 65536);
        assert!(config.name.is_none());
    }

    #[test]
    fn test_valid_json() {
        let json = r#"{
            "name": "scripting",
            "max_frame_depth": 32,
            "max_locals": 1024
        }"#;

        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.name.as_deref(), Some("scripting"));
        assert_eq!(config.max_frame_depth, 32);
        assert_eq!(config.max_locals, 1024);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_zero_frame_depth_rejected() {
        let result = EngineConfig::from_json_str(r#"{"max_frame_depth": 0}"#);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = EngineConfig::from_json_str("{ max_frame_depth: ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_locals": 8}}"#).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_locals, 8);
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_json_file("/nonexistent/poly_engine.json");
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_schema_json() {
        let schema = EngineConfig::schema_json().unwrap();
        assert!(schema.contains("max_frame_depth"));
        assert!(schema.contains("Polyscript Engine Configuration"));
    }
}
