use crate::core::workflow::executor::EngineSettings;
use crate::core::workflow::parser::ParserSettings;
use crate::core::workflow::script::ScriptLimits;
use serde::{Deserialize, Serialize};

pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Main procflow configuration loaded from procflow.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcflowConfig {
    /// Definition parsing
    #[serde(default)]
    pub parser: ParserConfig,

    /// Workflow execution limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Expression runtime limits
    #[serde(default)]
    pub expression: ExpressionConfig,
}

/// Parser configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Compile every expression while parsing
    #[serde(default = "default_eager_compile")]
    pub eager_compile: bool,

    /// Deepest accepted scope nesting
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,

    #[serde(default = "default_max_time_seconds")]
    pub max_time_seconds: u64,

    #[serde(default = "default_max_activity_iterations")]
    pub max_activity_iterations: usize,

    #[serde(default = "default_max_workflow_iterations")]
    pub max_workflow_iterations: usize,
}

/// Expression configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,
}

// Default functions
fn default_eager_compile() -> bool {
    ParserSettings::default().eager_compile
}

fn default_max_nesting_depth() -> usize {
    ParserSettings::default().max_nesting_depth
}

fn default_parallel_limit() -> usize {
    EngineSettings::default().parallel_limit
}

fn default_max_time_seconds() -> u64 {
    EngineSettings::default().max_time_seconds
}

fn default_max_activity_iterations() -> usize {
    EngineSettings::default().max_activity_iterations
}

fn default_max_workflow_iterations() -> usize {
    EngineSettings::default().max_workflow_iterations
}

fn default_max_operations() -> u64 {
    ScriptLimits::default().max_operations
}

fn default_max_call_levels() -> usize {
    ScriptLimits::default().max_call_levels
}

fn default_max_expr_depth() -> usize {
    ScriptLimits::default().max_expr_depth
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            eager_compile: default_eager_compile(),
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallel_limit: default_parallel_limit(),
            max_time_seconds: default_max_time_seconds(),
            max_activity_iterations: default_max_activity_iterations(),
            max_workflow_iterations: default_max_workflow_iterations(),
        }
    }
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        ExpressionConfig {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
        }
    }
}

impl ParserConfig {
    pub fn settings(&self) -> ParserSettings {
        ParserSettings {
            eager_compile: self.eager_compile,
            max_nesting_depth: self.max_nesting_depth,
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            parallel_limit: self.parallel_limit,
            max_time_seconds: self.max_time_seconds,
            max_activity_iterations: self.max_activity_iterations,
            max_workflow_iterations: self.max_workflow_iterations,
        }
    }
}

impl ExpressionConfig {
    pub fn limits(&self) -> ScriptLimits {
        ScriptLimits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
            max_expr_depth: self.max_expr_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ProcflowConfig::default();
        assert!(config.parser.eager_compile);
        assert_eq!(config.parser.max_nesting_depth, 32);
        assert_eq!(config.engine.parallel_limit, 4);
        assert_eq!(config.engine.max_time_seconds, 300);
        assert_eq!(config.expression.max_operations, 50_000);
        assert_eq!(config.engine.settings(), EngineSettings::default());
        assert_eq!(config.parser.settings(), ParserSettings::default());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let toml = r#"
[engine]
parallel_limit = 8

[expression]
max_operations = 1000
"#;

        let config: ProcflowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.parallel_limit, 8);
        assert_eq!(config.engine.max_activity_iterations, 100); // Default value
        assert_eq!(config.expression.limits().max_operations, 1000);
        assert!(config.parser.eager_compile);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[parser]
eager_compile = false
max_nesting_depth = 4

[engine]
parallel_limit = 2
max_time_seconds = 10
max_activity_iterations = 5
max_workflow_iterations = 50

[expression]
max_operations = 10
max_call_levels = 8
max_expr_depth = 16
"#;

        let config: ProcflowConfig = toml::from_str(toml).unwrap();
        assert!(!config.parser.eager_compile);
        assert_eq!(config.parser.max_nesting_depth, 4);
        assert_eq!(config.engine.max_workflow_iterations, 50);
        assert_eq!(config.expression.max_expr_depth, 16);
    }
}
