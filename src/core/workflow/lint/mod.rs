use crate::core::error::{AppError, CONTEXT_ACTIVITY_ID, CONTEXT_SCOPE_PATH};
use crate::core::types::ErrorSeverity;
use crate::core::workflow::model::Workflow;
use serde::Serialize;
use std::fmt;

pub mod rules;
pub use rules::*;

/// Diagnostic severity levels emitted by definition lint rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    fn rank(&self) -> u8 {
        match self {
            IssueSeverity::Error => 3,
            IssueSeverity::Warning => 2,
            IssueSeverity::Info => 1,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Error => write!(f, "Error"),
            IssueSeverity::Warning => write!(f, "Warning"),
            IssueSeverity::Info => write!(f, "Info"),
        }
    }
}

/// Individual diagnostic found in a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    /// Display path of the offending scope or activity, e.g. `/sub/inner`.
    pub location: Option<String>,
    pub suggestion: Option<String>,
}

impl ParseIssue {
    pub fn new(
        code: impl Into<String>,
        severity: IssueSeverity,
        message: impl Into<String>,
        location: Option<String>,
        suggestion: Option<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            location,
            suggestion,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

impl From<&AppError> for ParseIssue {
    fn from(error: &AppError) -> Self {
        let severity = match error.severity {
            ErrorSeverity::Error => IssueSeverity::Error,
            ErrorSeverity::Warning => IssueSeverity::Warning,
            ErrorSeverity::Info | ErrorSeverity::Debug => IssueSeverity::Info,
        };
        let location = match (error.detail(CONTEXT_SCOPE_PATH), error.detail(CONTEXT_ACTIVITY_ID)) {
            (Some(scope), Some(activity)) if scope == "/" => Some(format!("/{}", activity)),
            (Some(scope), Some(activity)) => Some(format!("{}/{}", scope, activity)),
            (Some(scope), None) => Some(scope.to_string()),
            (None, Some(activity)) => Some(activity.to_string()),
            (None, None) => None,
        };
        Self {
            code: error.code.clone(),
            severity,
            message: error.message.clone(),
            location,
            suggestion: error.recovery_suggestions.first().cloned(),
        }
    }
}

/// Trait implemented by definition lint rules. Rules see the normalized
/// definition: every owned transition sits on its source activity.
pub trait DefinitionLintRule: Send + Sync {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue>;
}

/// Registry that runs all built-in definition lint rules.
pub struct LintRegistry {
    rules: Vec<Box<dyn DefinitionLintRule>>,
}

impl LintRegistry {
    /// Construct a registry populated with the built-in rules.
    pub fn new() -> Self {
        Self {
            rules: built_in_rules(),
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn DefinitionLintRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Run all registered rules. The results are sorted by
    /// `(severity desc, code asc, location asc)`.
    pub fn run(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let mut results = Vec::new();
        for rule in &self.rules {
            results.extend(rule.validate(workflow));
        }
        sort_issues(&mut results);
        results
    }
}

impl Default for LintRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sort_issues(issues: &mut [ParseIssue]) {
    issues.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(a.code.cmp(&b.code))
            .then(a.location.cmp(&b.location))
    });
}
