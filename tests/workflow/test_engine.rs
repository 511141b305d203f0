use indexmap::IndexMap;
use procflow::core::types::{ErrorCategory, ExecutionStatus};
use procflow::core::workflow::activity_types::builtin_registry;
use procflow::core::workflow::executor::ActivityRunStatus;
use procflow::core::workflow::model::{Activity, Condition, Transition, Variable, Workflow};
use procflow::core::workflow::{
    EngineSettings, ExecutableWorkflow, ExpressionService, ParserSettings, WorkflowEngine,
    WorkflowParser,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn prepare(workflow: &Workflow, settings: EngineSettings) -> (WorkflowEngine, ExecutableWorkflow) {
    let expressions = Arc::new(ExpressionService::default());
    let parser = WorkflowParser::new(Arc::clone(&expressions), ParserSettings::default());
    let executable = parser.parse(workflow).unwrap();
    let engine = WorkflowEngine::new(builtin_registry().unwrap(), expressions, settings);
    (engine, executable)
}

fn vars(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn approval() -> Workflow {
    Workflow::new()
        .variable(Variable::new("amount").default_value(42))
        .variable(Variable::new("approved").default_value(false))
        .activity(Activity::start_event("start").transition_to_next())
        .activity(
            Activity::exclusive_gateway("check")
                .transition(
                    Transition::new()
                        .id("large")
                        .condition(Condition::expr("amount > 100"))
                        .to("review"),
                )
                .transition(Transition::new().id("small").to("done"))
                .default_transition_id("small"),
        )
        .activity(
            Activity::none_task("review")
                .in_value("decision", true)
                .out("decision", "approved")
                .transition_to("done"),
        )
        .activity(Activity::end_event("done"))
}

#[tokio::test]
async fn small_amounts_take_the_default_path() {
    let (engine, executable) = prepare(&approval(), EngineSettings::default());
    let summary = engine.run(&executable, IndexMap::new()).await.unwrap();

    assert_eq!(summary.status, ExecutionStatus::Completed);
    assert_eq!(summary.runs_of("review").count(), 0);
    assert_eq!(summary.runs_of("done").count(), 1);
    assert_eq!(summary.variables["approved"], json!(false));
    assert_eq!(summary.fingerprint, executable.fingerprint());
}

#[tokio::test]
async fn initial_variables_steer_the_gateway() {
    let (engine, executable) = prepare(&approval(), EngineSettings::default());
    let summary = engine
        .run(&executable, vars(&[("amount", json!(500))]))
        .await
        .unwrap();

    let order: Vec<&str> = summary
        .activity_runs
        .iter()
        .map(|record| record.activity_id.as_str())
        .collect();
    assert_eq!(order, vec!["start", "check", "review", "done"]);
    assert_eq!(summary.variables["approved"], json!(true));
    assert_eq!(summary.variables["amount"], json!(500));
    assert_eq!(summary.total_iterations, 4);
}

#[tokio::test]
async fn script_task_result_is_written_out() {
    let workflow = Workflow::new()
        .variable(Variable::new("amount").default_value(21))
        .variable(Variable::new("doubled"))
        .activity(Activity::script_task("double", "amount * 2").out("result", "doubled"));
    let (engine, executable) = prepare(&workflow, EngineSettings::default());
    let summary = engine.run(&executable, IndexMap::new()).await.unwrap();

    assert_eq!(summary.variables["doubled"], json!(42));
    let record = summary.runs_of("double").next().unwrap();
    assert_eq!(record.activity_type, "scriptTask");
    assert_eq!(record.status, ActivityRunStatus::Completed);
    assert_eq!(record.outputs["result"], json!(42));
}

#[tokio::test]
async fn script_assignments_reach_the_workflow_variables() {
    let workflow = Workflow::new()
        .variable(Variable::new("counter").default_value(1))
        .activity(Activity::script_task("bump", "counter = counter + 1; let scratch = 9; 0"));
    let (engine, executable) = prepare(&workflow, EngineSettings::default());
    let summary = engine.run(&executable, IndexMap::new()).await.unwrap();

    assert_eq!(summary.variables["counter"], json!(2));
    assert!(!summary.variables.contains_key("scratch"));
    let record = summary.runs_of("bump").next().unwrap();
    assert_eq!(record.outputs["counter"], json!(2));
}

#[tokio::test]
async fn subprocess_exports_declared_child_variable() {
    let workflow = Workflow::new().activity(
        Activity::sub_process("scoring")
            .variable(Variable::new("score"))
            .in_value("base", 10)
            .activity(
                Activity::script_task("score_it", "let score = base * 3; score")
                    .out("score", "score"),
            )
            .out("score", "final"),
    );
    let (engine, executable) = prepare(&workflow, EngineSettings::default());
    let summary = engine.run(&executable, IndexMap::new()).await.unwrap();

    assert_eq!(summary.variables["final"], json!(30));
    assert!(!summary.variables.contains_key("score"));
    assert!(!summary.variables.contains_key("base"));
    let inner = summary.runs_of("score_it").next().unwrap();
    assert_eq!(inner.scope, "/scoring");
    assert_eq!(summary.runs_of("scoring").next().unwrap().outputs["score"], json!(30));
}

#[tokio::test]
async fn failing_script_fails_the_run() {
    let workflow = Workflow::new().activity(Activity::script_task("broken", "undefined_value + 1"));
    let (engine, executable) = prepare(&workflow, EngineSettings::default());
    let err = engine.run(&executable, IndexMap::new()).await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::EvaluationError);
    assert_eq!(err.code, "PF-EXPR-002");
    assert_eq!(err.detail("activity_id"), Some("broken"));
}

#[tokio::test]
async fn unregistered_types_are_rejected_before_running() {
    let workflow = Workflow::new()
        .activity(Activity::none_task("first").transition_to_next())
        .activity(Activity::service_task("notify", "emailTask"));
    let (engine, executable) = prepare(&workflow, EngineSettings::default());

    let err = engine.validate(&executable).unwrap_err();
    assert_eq!(err.code, "PF-DEF-009");
    assert!(err.recovery_suggestions[0].contains("scriptTask"));
    assert!(engine.run(&executable, IndexMap::new()).await.is_err());
}

#[tokio::test]
async fn loops_hit_the_workflow_iteration_cap() {
    let workflow = Workflow::new()
        .activity(Activity::none_task("a").transition_to_next())
        .activity(Activity::none_task("b").transition_to("a"));
    let settings = EngineSettings {
        max_workflow_iterations: 5,
        ..EngineSettings::default()
    };
    let (engine, executable) = prepare(&workflow, settings);
    let err = engine.run(&executable, IndexMap::new()).await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::IterationError);
    assert_eq!(err.code, "PF-EXEC-002");
}

#[tokio::test]
async fn cancelled_runs_stop_before_the_first_activity() {
    let (engine, executable) = prepare(&approval(), EngineSettings::default());
    let token = CancellationToken::new();
    token.cancel();
    let err = engine
        .run_with_cancellation(&executable, IndexMap::new(), token)
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::CancelledError);
    assert_eq!(err.code, "PF-EXEC-004");
}

#[tokio::test]
async fn summary_serializes_camel_case() {
    let (engine, executable) = prepare(&approval(), EngineSettings::default());
    let summary = engine.run(&executable, IndexMap::new()).await.unwrap();
    let value = serde_json::to_value(&summary).unwrap();

    assert!(value.get("executionId").is_some());
    assert_eq!(value["activityRuns"][0]["activityId"], "start");
    assert_eq!(value["activityRuns"][0]["status"], "completed");
}
