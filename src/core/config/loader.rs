#![allow(clippy::result_large_err)]

use super::ProcflowConfig;
use crate::core::config::ConfigValidator;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "procflow.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from workspace root (workspace/procflow.toml)
    /// Environment variables override config file values
    pub fn load_from_workspace(workspace_path: &Path) -> Result<ProcflowConfig, AppError> {
        let config_path = workspace_path.join(CONFIG_FILE_NAME);
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();

        Self::apply_env_overrides(&mut config);
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<ProcflowConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
            .with_code("PF-CFG-001")
        })?;

        let config: ProcflowConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
            .with_code("PF-CFG-002")
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration.
    /// Values that fail to parse are ignored.
    fn apply_env_overrides(config: &mut ProcflowConfig) {
        // Parser overrides
        override_from_env("PROCFLOW_PARSER_EAGER_COMPILE", &mut config.parser.eager_compile);
        override_from_env(
            "PROCFLOW_PARSER_MAX_NESTING_DEPTH",
            &mut config.parser.max_nesting_depth,
        );

        // Engine overrides
        override_from_env("PROCFLOW_ENGINE_PARALLEL_LIMIT", &mut config.engine.parallel_limit);
        override_from_env(
            "PROCFLOW_ENGINE_MAX_TIME_SECONDS",
            &mut config.engine.max_time_seconds,
        );
        override_from_env(
            "PROCFLOW_ENGINE_MAX_ACTIVITY_ITERATIONS",
            &mut config.engine.max_activity_iterations,
        );
        override_from_env(
            "PROCFLOW_ENGINE_MAX_WORKFLOW_ITERATIONS",
            &mut config.engine.max_workflow_iterations,
        );

        // Expression overrides
        override_from_env(
            "PROCFLOW_EXPRESSION_MAX_OPERATIONS",
            &mut config.expression.max_operations,
        );
        override_from_env(
            "PROCFLOW_EXPRESSION_MAX_CALL_LEVELS",
            &mut config.expression.max_call_levels,
        );
        override_from_env(
            "PROCFLOW_EXPRESSION_MAX_EXPR_DEPTH",
            &mut config.expression.max_expr_depth,
        );
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "PROCFLOW_PARSER_EAGER_COMPILE - Compile expressions while parsing (true/false, default: true)",
            "PROCFLOW_PARSER_MAX_NESTING_DEPTH - Deepest accepted scope nesting (default: 32)",
            "PROCFLOW_ENGINE_PARALLEL_LIMIT - Concurrent activities per scope (default: 4)",
            "PROCFLOW_ENGINE_MAX_TIME_SECONDS - Wall-clock limit of a run (default: 300)",
            "PROCFLOW_ENGINE_MAX_ACTIVITY_ITERATIONS - Starts allowed per activity (default: 100)",
            "PROCFLOW_ENGINE_MAX_WORKFLOW_ITERATIONS - Activity starts allowed per run (default: 10000)",
            "PROCFLOW_EXPRESSION_MAX_OPERATIONS - Operations allowed per evaluation (default: 50000)",
            "PROCFLOW_EXPRESSION_MAX_CALL_LEVELS - Function call depth per evaluation (default: 64)",
            "PROCFLOW_EXPRESSION_MAX_EXPR_DEPTH - Expression nesting depth (default: 64)",
        ]
    }
}

fn override_from_env<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = env::var(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = name, value = %raw, "ignoring unparsable override"),
        }
    }
}
