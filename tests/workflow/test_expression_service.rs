use procflow::core::error::CONTEXT_PARAMETER_KEY;
use procflow::core::types::ErrorCategory;
use procflow::core::workflow::model::{Binding, Condition, InputParameter, Variable};
use procflow::core::workflow::{
    DataType, ExpressionService, ResolvedInput, RhaiScriptService, ScopeInstance, ScriptLimits,
    ScriptService, TypedValue,
};
use serde_json::json;
use std::sync::Arc;

fn instance() -> Arc<ScopeInstance> {
    ScopeInstance::root(&[
        Variable::new("amount").default_value(42),
        Variable::new("customer").default_value("ada"),
    ])
    .unwrap()
}

#[test]
fn absent_expression_is_not_an_error() {
    let service = ExpressionService::default();
    assert!(service.compile(None).unwrap().is_none());
    assert!(service.compile(Some("amount + 1")).unwrap().is_some());
}

#[test]
fn compile_errors_are_reported_once_per_text() {
    let service = ExpressionService::default();
    let err = service.compile_text("amount +").unwrap_err();
    assert_eq!(err.category, ErrorCategory::CompileError);
    assert_eq!(err.code, "PF-EXPR-001");
    assert_eq!(service.cached_count(), 0);
}

#[test]
fn evaluate_captures_logs_and_result() {
    let service = ExpressionService::default();
    let compiled = service
        .compile_text("print(\"checking \" + customer); amount > 10")
        .unwrap();
    let result = service.evaluate(&compiled, &instance());
    assert!(result.is_success());
    assert_eq!(result.result, json!(true));
    assert_eq!(result.logs, "checking ada\n");
}

#[test]
fn runtime_failures_surface_as_exceptions() {
    let service = ExpressionService::default();
    let compiled = service.compile_text("missing_variable * 2").unwrap();
    let result = service.evaluate(&compiled, &instance());
    assert!(!result.is_success());
    assert!(result.exception.is_some());

    let err = service.execute(&compiled, &instance()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::EvaluationError);
}

#[test]
fn typed_bindings_are_coerced() {
    let service = ExpressionService::default();
    let typed = service
        .resolve_binding(&Binding::value("12.5").data_type(DataType::Number), &instance())
        .unwrap();
    assert_eq!(typed.value, json!(12.5));

    let computed = service
        .resolve_binding(
            &Binding::expression("amount * 2").data_type(DataType::Text),
            &instance(),
        )
        .unwrap();
    assert_eq!(computed.value, json!("84"));
}

#[test]
fn single_and_multiple_inputs() {
    let service = ExpressionService::default();
    let single = service
        .resolve_input(
            "amount",
            &InputParameter::single(Binding::expression("amount + 1")),
            &instance(),
        )
        .unwrap();
    assert_eq!(single, ResolvedInput::Single(TypedValue::inferred(json!(43))));

    let multiple = service
        .resolve_input(
            "names",
            &InputParameter::Multiple(vec![
                Binding::expression("customer"),
                Binding::value("grace"),
            ]),
            &instance(),
        )
        .unwrap();
    assert_eq!(multiple.into_value(), json!(["ada", "grace"]));
}

#[test]
fn failing_binding_names_its_parameter() {
    let service = ExpressionService::default();
    let err = service
        .resolve_input(
            "names",
            &InputParameter::Multiple(vec![Binding::value("ok"), Binding::expression("nope()")]),
            &instance(),
        )
        .unwrap_err();
    assert_eq!(err.detail(CONTEXT_PARAMETER_KEY), Some("names"));
}

#[test]
fn conditions_must_be_boolean() {
    let service = ExpressionService::default();
    assert!(service
        .evaluate_condition(&Condition::expr("amount == 42"), &instance())
        .unwrap());
    assert!(!service
        .evaluate_condition(&Condition::Bool(false), &instance())
        .unwrap());
    assert_eq!(
        service
            .evaluate_condition(&Condition::expr("customer"), &instance())
            .unwrap_err()
            .code,
        "PF-EXPR-003"
    );
}

#[test]
fn operation_limit_stops_runaway_scripts() {
    let service = ExpressionService::new(Arc::new(RhaiScriptService::new(ScriptLimits {
        max_operations: 1_000,
        ..ScriptLimits::default()
    })));
    let compiled = service
        .compile_text("let n = 0; loop { n += 1; }")
        .unwrap();
    let result = service.evaluate(&compiled, &instance());
    assert!(result.exception.is_some());
    assert_eq!(service.script_service().language(), "rhai");
}
