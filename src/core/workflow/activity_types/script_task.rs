use super::pass_through::RESULT_KEY;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::activity_type::{ActivityContext, ActivityOutput, ActivityType};
use crate::core::workflow::data::TypedValue;
use crate::core::workflow::model::{Activity, ActivityKind};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// Runs the activity's script with its inputs visible as variables.
///
/// Outputs are `result` (the script's value) plus every variable the script
/// assigned, under the variable's name. Assignments to variables of an
/// enclosing scope are also applied to that scope.
#[derive(Default)]
pub struct ScriptTaskActivity;

impl ScriptTaskActivity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActivityType for ScriptTaskActivity {
    fn name(&self) -> &str {
        "scriptTask"
    }

    fn validate(&self, activity: &Activity) -> Result<(), AppError> {
        match &activity.kind {
            ActivityKind::ScriptTask { .. } => Ok(()),
            other => Err(AppError::new(
                ErrorCategory::DefinitionError,
                format!(
                    "activity {} of type {} has no script",
                    activity.id,
                    other.type_name()
                ),
            )
            .with_code("PF-DEF-011")),
        }
    }

    async fn execute(
        &self,
        inputs: IndexMap<String, Value>,
        ctx: ActivityContext,
    ) -> Result<ActivityOutput, AppError> {
        let ActivityKind::ScriptTask { script } = &ctx.activity.kind else {
            return Err(AppError::new(
                ErrorCategory::InternalError,
                format!("activity {} is not a script task", ctx.activity.id),
            )
            .with_code("PF-EXEC-005"));
        };
        let compiled = ctx.expressions.compile_text(script)?;
        let locals = inputs
            .into_iter()
            .map(|(key, value)| (key, TypedValue::inferred(value)))
            .collect();
        let overlay = ctx.instance.overlay(locals);
        let outcome = ctx.expressions.evaluate(&compiled, &overlay);

        for line in outcome.logs.lines() {
            debug!(target: "procflow::script", activity_id = %ctx.activity.id, "{}", line);
        }
        if let Some(exception) = outcome.exception {
            return Err(AppError::new(
                ErrorCategory::EvaluationError,
                format!("script of {} failed: {}", ctx.activity.id, exception.message),
            )
            .with_code("PF-EXPR-002"));
        }

        let mut output = ActivityOutput::new().with(RESULT_KEY, outcome.result);
        for (name, update) in outcome.updates {
            debug!(variable = %name, scope = %overlay.path(), "script update");
            output.values.insert(name.clone(), update.value.clone());
            overlay.apply_update(&name, update);
        }
        Ok(output)
    }
}
