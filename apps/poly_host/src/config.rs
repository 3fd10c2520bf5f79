use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use poly_scope::{EngineConfig, RuntimeType, Validatable};

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Polyscript Host Configuration")]
#[schemars(description = "Configuration for the poly_host evaluator")]
pub struct HostConfig {
    /// Logging level
    #[serde(default = "default_log_level")]
    #[schemars(description = "Log level: trace, debug, info, warn, error")]
    #[schemars(regex(pattern = r"^(trace|debug|info|warn|error)$"))]
    pub log_level: String,

    /// Engine family used to evaluate expressions
    #[serde(default = "default_runtime")]
    #[schemars(description = "Engine family: 'javascript' evaluates expressions, 'memory' echoes them")]
    pub runtime: RuntimeType,

    /// Engine limits
    #[serde(default)]
    #[schemars(description = "Frame and local-reference limits of the engine")]
    pub engine: EngineConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_runtime() -> RuntimeType {
    RuntimeType::JavaScript
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            runtime: default_runtime(),
            engine: EngineConfig::default(),
        }
    }
}

impl Validatable for HostConfig {}
