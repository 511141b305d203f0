#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, CONTEXT_ACTIVITY_ID, CONTEXT_SCOPE_PATH};
use crate::core::types::ErrorCategory;
use crate::core::workflow::bpmn::DEFAULT_MAX_DEPTH;
use crate::core::workflow::executable::ExecutableWorkflow;
use crate::core::workflow::expression::ExpressionService;
use crate::core::workflow::lint::{
    scope_errors, sort_issues, IssueSeverity, LintRegistry, ParseIssue,
};
use crate::core::workflow::model::{
    ActivityKind, CompletionCondition, Scope, ScopePath, Workflow,
};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// Parser behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserSettings {
    /// Compile every expression while parsing instead of on first use.
    pub eager_compile: bool,
    /// Deepest scope nesting accepted, the root scope being depth 0.
    pub max_nesting_depth: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            eager_compile: true,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Hook run after a definition has been parsed successfully.
pub trait WorkflowParseListener: Send + Sync {
    fn on_parsed(
        &self,
        workflow: &Workflow,
        executable: &ExecutableWorkflow,
        parser: &WorkflowParser,
    ) -> Result<(), AppError>;
}

/// Expression text found in a definition, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionSite {
    pub scope: ScopePath,
    pub activity_id: Option<String>,
    pub text: String,
}

/// Turns workflow definitions into [`ExecutableWorkflow`]s.
pub struct WorkflowParser {
    expressions: Arc<ExpressionService>,
    settings: ParserSettings,
    listeners: Vec<Arc<dyn WorkflowParseListener>>,
    rules: LintRegistry,
}

impl WorkflowParser {
    pub fn new(expressions: Arc<ExpressionService>, settings: ParserSettings) -> Self {
        Self {
            expressions,
            settings,
            listeners: Vec::new(),
            rules: LintRegistry::new(),
        }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn expressions(&self) -> &Arc<ExpressionService> {
        &self.expressions
    }

    pub fn add_listener(&mut self, listener: Arc<dyn WorkflowParseListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Check, resolve and (when configured) compile `workflow`.
    pub fn parse(&self, workflow: &Workflow) -> Result<ExecutableWorkflow, AppError> {
        let span = info_span!(
            "workflow.parse",
            workflow_id = workflow.id.as_ref().map(|id| id.as_str()).unwrap_or("-")
        );
        let _guard = span.enter();

        let normalized = workflow.normalized();
        let scopes = self.bounded_scopes(&normalized)?;

        for (path, scope) in &scopes {
            let mut errors = scope_errors(path, scope);
            if errors.is_empty() {
                continue;
            }
            for extra in errors.iter().skip(1) {
                debug!(code = %extra.code, "additional definition error: {}", extra.message);
            }
            return Err(errors.swap_remove(0));
        }

        let issues = self.rules.run(&normalized);
        if let Some(issue) = issues.iter().find(|issue| issue.is_error()) {
            let mut error = AppError::new(ErrorCategory::DefinitionError, issue.message.clone())
                .with_code(issue.code.clone());
            if let Some(location) = &issue.location {
                error = error.with_detail("location", location.clone());
            }
            if let Some(suggestion) = &issue.suggestion {
                error = error.with_suggestion(suggestion.clone());
            }
            return Err(error);
        }
        for issue in &issues {
            warn!(
                code = %issue.code,
                location = issue.location.as_deref().unwrap_or("-"),
                "{}",
                issue.message
            );
        }

        let compiled = if self.settings.eager_compile {
            self.compile_all(&normalized)?
        } else {
            0
        };

        let executable = ExecutableWorkflow::build(normalized, issues)?;
        for listener in &self.listeners {
            listener.on_parsed(workflow, &executable, self)?;
        }
        info!(
            scopes = executable.scope_count(),
            compiled,
            fingerprint = executable.fingerprint(),
            "workflow parsed"
        );
        Ok(executable)
    }

    /// Every diagnostic for `workflow`: structural faults, lint findings and
    /// expressions that fail to compile. Never fails.
    pub fn lint(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let normalized = workflow.normalized();
        let mut issues = match self.bounded_scopes(&normalized) {
            Ok(_) => self.rules.run(&normalized),
            Err(err) => return vec![ParseIssue::from(&err)],
        };
        for site in expression_sites(&normalized) {
            if let Err(err) = self.expressions.compile_text(&site.text) {
                let location = match &site.activity_id {
                    Some(id) => site.scope.activity(id),
                    None => site.scope.to_string(),
                };
                issues.push(ParseIssue::new(
                    err.code.clone(),
                    IssueSeverity::Error,
                    err.message.clone(),
                    Some(location),
                    Some("fix syntax so the expression compiles".to_string()),
                ));
            }
        }
        sort_issues(&mut issues);
        issues
    }

    /// Scopes of the definition, parents first, refusing nesting beyond the
    /// configured depth before descending into it.
    fn bounded_scopes<'w>(
        &self,
        workflow: &'w Workflow,
    ) -> Result<Vec<(ScopePath, &'w Scope)>, AppError> {
        let mut out = Vec::new();
        let mut pending = vec![(ScopePath::root(), &workflow.scope)];
        while let Some((path, scope)) = pending.pop() {
            if path.depth() > self.settings.max_nesting_depth {
                return Err(AppError::new(
                    ErrorCategory::DefinitionError,
                    format!(
                        "scope nesting exceeds the maximum depth of {}",
                        self.settings.max_nesting_depth
                    ),
                )
                .with_code("PF-DEF-008")
                .with_detail(CONTEXT_SCOPE_PATH, path.to_string()));
            }
            for activity in scope.activities.iter().rev() {
                pending.push((path.child(&activity.id), &activity.scope));
            }
            out.push((path, scope));
        }
        Ok(out)
    }

    fn compile_all(&self, workflow: &Workflow) -> Result<usize, AppError> {
        let sites = expression_sites(workflow);
        for site in &sites {
            self.expressions.compile_text(&site.text).map_err(|err| {
                let err = err.with_detail(CONTEXT_SCOPE_PATH, site.scope.to_string());
                match &site.activity_id {
                    Some(id) => err.with_detail(CONTEXT_ACTIVITY_ID, id.clone()),
                    None => err,
                }
            })?;
        }
        debug!(expressions = sites.len(), "compiled definition expressions");
        Ok(sites.len())
    }
}

/// Every expression of a definition in document order: binding
/// expressions, multi-instance collection and completion, scripts,
/// transition conditions and timer due dates.
pub fn expression_sites(workflow: &Workflow) -> Vec<ExpressionSite> {
    let mut sites = Vec::new();
    for (path, scope) in workflow.scopes() {
        for timer in &scope.timers {
            if let Some(text) = &timer.due_date_expression {
                sites.push(ExpressionSite {
                    scope: path.clone(),
                    activity_id: None,
                    text: text.clone(),
                });
            }
        }
        for activity in &scope.activities {
            let mut push = |text: &str| {
                sites.push(ExpressionSite {
                    scope: path.clone(),
                    activity_id: Some(activity.id.clone()),
                    text: text.to_string(),
                })
            };
            for parameter in activity.inputs.values() {
                for binding in parameter.bindings() {
                    if let Some(text) = binding.expression_text() {
                        push(text);
                    }
                }
            }
            if let Some(multi_instance) = &activity.multi_instance {
                for binding in multi_instance.collection.bindings() {
                    if let Some(text) = binding.expression_text() {
                        push(text);
                    }
                }
                if let CompletionCondition::Expression(text) = &multi_instance.completion {
                    push(text);
                }
            }
            if let ActivityKind::ScriptTask { script } = &activity.kind {
                push(script);
            }
            for transition in &activity.outgoing_transitions {
                if let Some(text) = transition.condition.as_ref().and_then(|c| c.expression()) {
                    push(text);
                }
            }
        }
    }
    sites
}
