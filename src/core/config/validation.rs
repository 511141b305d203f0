#![allow(clippy::result_large_err)]

use super::ProcflowConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules. Every limit must be positive.
    pub fn validate(config: &ProcflowConfig) -> Result<(), AppError> {
        let limits: [(&str, u64); 8] = [
            ("parser.max_nesting_depth", config.parser.max_nesting_depth as u64),
            ("engine.parallel_limit", config.engine.parallel_limit as u64),
            ("engine.max_time_seconds", config.engine.max_time_seconds),
            (
                "engine.max_activity_iterations",
                config.engine.max_activity_iterations as u64,
            ),
            (
                "engine.max_workflow_iterations",
                config.engine.max_workflow_iterations as u64,
            ),
            ("expression.max_operations", config.expression.max_operations),
            (
                "expression.max_call_levels",
                config.expression.max_call_levels as u64,
            ),
            (
                "expression.max_expr_depth",
                config.expression.max_expr_depth as u64,
            ),
        ];

        if let Some((key, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("{} must be greater than zero", key),
            )
            .with_code("PF-CFG-003")
            .with_detail("key", *key));
        }

        if config.engine.max_activity_iterations > config.engine.max_workflow_iterations {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "engine.max_activity_iterations cannot exceed engine.max_workflow_iterations",
            )
            .with_code("PF-CFG-004")
            .with_suggestion("raise engine.max_workflow_iterations"));
        }

        Ok(())
    }
}
