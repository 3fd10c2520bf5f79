//! Runtime type enumeration
//!
//! Identifies which engine family an adapter wraps. Used in log labels
//! (`js#3`) and in configuration files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// In-process reference engine
    Memory,
    /// QuickJS through rquickjs
    #[serde(rename = "javascript", alias = "js")]
    JavaScript,
}

impl RuntimeType {
    /// Determine runtime type from a configuration name
    ///
    /// # Errors
    /// Returns an error if the name is not a known runtime
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(RuntimeType::Memory),
            "javascript" | "js" | "quickjs" => Ok(RuntimeType::JavaScript),
            other => Err(ConfigError::UnknownRuntime(other.to_string())),
        }
    }

    /// Get the human-readable name of this runtime type
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeType::Memory => "Memory",
            RuntimeType::JavaScript => "JavaScript",
        }
    }

    /// Short tag used in log labels
    pub fn tag(&self) -> &'static str {
        match self {
            RuntimeType::Memory => "mem",
            RuntimeType::JavaScript => "js",
        }
    }
}
