#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, CONTEXT_PARAMETER_KEY};
use crate::core::types::ErrorCategory;
use crate::core::workflow::data::TypedValue;
use crate::core::workflow::instance::ScopeInstance;
use crate::core::workflow::model::{Binding, BindingSource, Condition, InputParameter};
use crate::core::workflow::script::{
    CompiledScript, RhaiScriptService, ScriptLimits, ScriptResult, ScriptService,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Compiled handle of one expression text, shareable across threads.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    script: CompiledScript,
}

impl CompiledExpression {
    pub fn text(&self) -> &str {
        self.script.text()
    }

    pub fn script(&self) -> &CompiledScript {
        &self.script
    }
}

/// Resolved value of an input parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedInput {
    Single(TypedValue),
    /// One value per binding, in declaration order.
    Multiple(Vec<TypedValue>),
}

impl ResolvedInput {
    /// Plain JSON form handed to activity types; a binding list becomes an array.
    pub fn into_value(self) -> Value {
        match self {
            ResolvedInput::Single(value) => value.value,
            ResolvedInput::Multiple(values) => {
                Value::Array(values.into_iter().map(|value| value.value).collect())
            }
        }
    }
}

/// Façade over a [`ScriptService`] that caches compiled handles per
/// expression text and resolves bindings against scope instances.
pub struct ExpressionService {
    scripts: Arc<dyn ScriptService>,
    cache: DashMap<String, CompiledExpression>,
}

impl Default for ExpressionService {
    fn default() -> Self {
        Self::with_limits(ScriptLimits::default())
    }
}

impl ExpressionService {
    pub fn new(scripts: Arc<dyn ScriptService>) -> Self {
        Self {
            scripts,
            cache: DashMap::new(),
        }
    }

    /// Service backed by the Rhai script runtime.
    pub fn with_limits(limits: ScriptLimits) -> Self {
        Self::new(Arc::new(RhaiScriptService::new(limits)))
    }

    pub fn script_service(&self) -> &Arc<dyn ScriptService> {
        &self.scripts
    }

    /// Number of distinct expression texts compiled so far.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Compile `text`, reusing the cached handle for a text seen before.
    /// Absent text yields an absent handle.
    pub fn compile(&self, text: Option<&str>) -> Result<Option<CompiledExpression>, AppError> {
        match text {
            Some(text) => self.compile_text(text).map(Some),
            None => Ok(None),
        }
    }

    pub fn compile_text(&self, text: &str) -> Result<CompiledExpression, AppError> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit.value().clone());
        }
        // Two callers may compile the same text concurrently; the first insert wins.
        let compiled = CompiledExpression {
            script: self.scripts.compile(text)?,
        };
        trace!(expression = text, "compiled expression");
        Ok(self
            .cache
            .entry(text.to_string())
            .or_insert(compiled)
            .value()
            .clone())
    }

    /// Evaluate and return the full record without touching the instance.
    pub fn evaluate(&self, expression: &CompiledExpression, instance: &ScopeInstance) -> ScriptResult {
        self.scripts.evaluate(instance, &expression.script)
    }

    /// Evaluate, apply the script's updates to `instance` and return its value.
    pub fn execute(
        &self,
        expression: &CompiledExpression,
        instance: &ScopeInstance,
    ) -> Result<Value, AppError> {
        let outcome = self.evaluate(expression, instance);
        forward_logs(expression, &outcome.logs);
        if let Some(exception) = outcome.exception {
            return Err(AppError::with_source(
                ErrorCategory::EvaluationError,
                format!(
                    "expression '{}' failed: {}",
                    expression.text(),
                    exception.message
                ),
                Box::new(exception),
            )
            .with_code("PF-EXPR-002")
            .with_detail("expression", expression.text()));
        }
        for (name, value) in outcome.updates {
            debug!(variable = %name, scope = %instance.path(), "script update");
            instance.apply_update(&name, value);
        }
        Ok(outcome.result)
    }

    /// Evaluate a transition condition; expressions must produce a boolean.
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        instance: &ScopeInstance,
    ) -> Result<bool, AppError> {
        match condition {
            Condition::Bool(flag) => Ok(*flag),
            Condition::Expr { expr } => {
                let compiled = self.compile_text(expr)?;
                match self.execute(&compiled, instance)? {
                    Value::Bool(flag) => Ok(flag),
                    other => Err(AppError::new(
                        ErrorCategory::EvaluationError,
                        format!("condition '{}' did not return bool but {}", expr, other),
                    )
                    .with_code("PF-EXPR-003")),
                }
            }
        }
    }

    /// Resolve one binding: literals are coerced, expressions are evaluated.
    pub fn resolve_binding(
        &self,
        binding: &Binding,
        instance: &ScopeInstance,
    ) -> Result<TypedValue, AppError> {
        let value = match &binding.source {
            BindingSource::Value(value) => value.clone(),
            BindingSource::Expression(text) => {
                let compiled = self.compile_text(text)?;
                self.execute(&compiled, instance)?
            }
        };
        TypedValue::resolve(value, binding.data_type.as_ref())
    }

    /// Resolve an input parameter; a binding list keeps its declaration order.
    pub fn resolve_input(
        &self,
        key: &str,
        parameter: &InputParameter,
        instance: &ScopeInstance,
    ) -> Result<ResolvedInput, AppError> {
        let resolved = match parameter {
            InputParameter::Single(binding) => {
                self.resolve_binding(binding, instance).map(ResolvedInput::Single)
            }
            InputParameter::Multiple(bindings) => bindings
                .iter()
                .map(|binding| self.resolve_binding(binding, instance))
                .collect::<Result<Vec<_>, _>>()
                .map(ResolvedInput::Multiple),
        };
        resolved.map_err(|err| err.with_detail(CONTEXT_PARAMETER_KEY, key))
    }
}

fn forward_logs(expression: &CompiledExpression, logs: &str) {
    for line in logs.lines() {
        debug!(target: "procflow::script", expression = expression.text(), "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::data::DataType;
    use crate::core::workflow::model::Variable;
    use serde_json::json;

    fn instance() -> Arc<ScopeInstance> {
        ScopeInstance::root(&[Variable::new("amount").default_value(42)]).unwrap()
    }

    #[test]
    fn absent_text_compiles_to_absent_handle() {
        let service = ExpressionService::default();
        assert!(service.compile(None).unwrap().is_none());
        assert_eq!(service.cached_count(), 0);
    }

    #[test]
    fn handles_are_cached_per_text() {
        let service = ExpressionService::default();
        service.compile(Some("amount + 1")).unwrap();
        service.compile(Some("amount + 1")).unwrap();
        service.compile(Some("amount + 2")).unwrap();
        assert_eq!(service.cached_count(), 2);
    }

    #[test]
    fn literal_bindings_are_referentially_transparent() {
        let service = ExpressionService::default();
        let instance = instance();
        let binding = Binding::value("42").data_type(DataType::Number);
        let first = service.resolve_binding(&binding, &instance).unwrap();
        instance.set_local("amount", TypedValue::inferred(json!(7)));
        let second = service.resolve_binding(&binding, &instance).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value, json!(42));
    }

    #[test]
    fn multi_binding_resolves_in_order() {
        let service = ExpressionService::default();
        let parameter = InputParameter::Multiple(vec![
            Binding::value("first"),
            Binding::expression("amount * 2"),
            Binding::value(true),
        ]);
        let resolved = service
            .resolve_input("items", &parameter, &instance())
            .unwrap();
        assert_eq!(resolved.into_value(), json!(["first", 84, true]));
    }

    #[test]
    fn execute_applies_updates() {
        let service = ExpressionService::default();
        let instance = instance();
        let compiled = service.compile_text("amount = amount + 1; amount").unwrap();
        assert_eq!(service.execute(&compiled, &instance).unwrap(), json!(43));
        assert_eq!(instance.get("amount").unwrap().value, json!(43));
    }

    #[test]
    fn evaluation_errors_carry_parameter_key() {
        let service = ExpressionService::default();
        let parameter = InputParameter::single(Binding::expression("unknown_thing * 2"));
        let err = service
            .resolve_input("total", &parameter, &instance())
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::EvaluationError);
        assert_eq!(err.detail(CONTEXT_PARAMETER_KEY), Some("total"));
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let service = ExpressionService::default();
        let err = service
            .evaluate_condition(&Condition::expr("amount"), &instance())
            .unwrap_err();
        assert_eq!(err.code, "PF-EXPR-003");
        assert!(service
            .evaluate_condition(&Condition::Bool(true), &instance())
            .unwrap());
    }
}
