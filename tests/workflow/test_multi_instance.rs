use indexmap::IndexMap;
use procflow::core::types::ErrorCategory;
use procflow::core::workflow::activity_types::builtin_registry;
use procflow::core::workflow::model::{
    Activity, Binding, CompletionCondition, MultiInstance, Variable, Workflow,
};
use procflow::core::workflow::multi_instance::InstanceEvent;
use procflow::core::workflow::{
    DataType, EngineSettings, ExecutionSummary, ExpressionService, ParserSettings, WorkflowEngine,
    WorkflowParser,
};
use procflow::core::AppError;
use serde_json::{json, Value};
use std::sync::Arc;

async fn run(workflow: Workflow) -> Result<ExecutionSummary, AppError> {
    let expressions = Arc::new(ExpressionService::default());
    let parser = WorkflowParser::new(Arc::clone(&expressions), ParserSettings::default());
    let executable = parser.parse(&workflow)?;
    let engine = WorkflowEngine::new(builtin_registry()?, expressions, EngineSettings::default());
    engine.run(&executable, IndexMap::new()).await
}

fn each(items: Value) -> MultiInstance {
    MultiInstance::new(Variable::new("item"), Binding::value(items))
}

fn fan_out(multi_instance: MultiInstance, script: &str) -> Workflow {
    Workflow::new().variable(Variable::new("last")).activity(
        Activity::script_task("each", script)
            .multi_instance(multi_instance)
            .out("result", "last"),
    )
}

fn completed_children(summary: &ExecutionSummary) -> Vec<usize> {
    summary
        .events
        .iter()
        .filter_map(|event| match event {
            InstanceEvent::MultiInstanceChildCompleted { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn empty_collection_completes_without_children() {
    for completion in [CompletionCondition::All, CompletionCondition::Any] {
        let summary = run(fan_out(each(json!([])).completion(completion), "item"))
            .await
            .unwrap();
        assert_eq!(
            summary.events,
            vec![
                InstanceEvent::MultiInstanceStarted {
                    activity_id: "each".to_string(),
                    instances: 0,
                },
                InstanceEvent::MultiInstanceCompleted {
                    activity_id: "each".to_string(),
                    completed: 0,
                    cancelled: 0,
                },
            ]
        );
        assert!(!summary.variables.contains_key("last"));
        assert_eq!(summary.runs_of("each").count(), 1);
    }
}

#[tokio::test]
async fn parallel_all_waits_for_every_child() {
    let summary = run(fan_out(each(json!([1, 2, 3])).parallel(), "item * 10"))
        .await
        .unwrap();

    let mut indices = completed_children(&summary);
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(matches!(
        summary.events.last(),
        Some(InstanceEvent::MultiInstanceCompleted { completed: 3, cancelled: 0, .. })
    ));
    let last = summary.variables["last"].as_i64().unwrap();
    assert!([10, 20, 30].contains(&last));
    assert!(summary.runs_of("each").next().unwrap().outputs.is_empty());
}

#[tokio::test]
async fn sequential_children_run_in_collection_order() {
    let summary = run(fan_out(each(json!([1, 2, 3])).sequential(), "item * 10"))
        .await
        .unwrap();

    assert_eq!(completed_children(&summary), vec![0, 1, 2]);
    assert_eq!(summary.variables["last"], json!(30));
}

#[tokio::test]
async fn loop_counter_is_visible_to_children() {
    let summary = run(fan_out(each(json!(["a", "b", "c"])).sequential(), "loopCounter"))
        .await
        .unwrap();
    assert_eq!(summary.variables["last"], json!(2));
}

#[tokio::test]
async fn sequential_any_stops_after_first_child() {
    let summary = run(fan_out(
        each(json!([1, 2, 3]))
            .sequential()
            .completion(CompletionCondition::Any),
        "item * 10",
    ))
    .await
    .unwrap();

    assert_eq!(completed_children(&summary), vec![0]);
    assert_eq!(summary.variables["last"], json!(10));
    assert!(matches!(
        summary.events.last(),
        Some(InstanceEvent::MultiInstanceCompleted { completed: 1, .. })
    ));
}

#[tokio::test]
async fn completion_expression_reads_counters() {
    let summary = run(fan_out(
        each(json!([1, 2, 3, 4]))
            .sequential()
            .completion(CompletionCondition::Expression(
                "nrOfCompletedInstances >= 2".to_string(),
            )),
        "item * 10",
    ))
    .await
    .unwrap();

    assert_eq!(completed_children(&summary), vec![0, 1]);
    assert_eq!(summary.variables["last"], json!(20));
}

#[tokio::test]
async fn binding_list_is_the_collection() {
    let workflow = Workflow::new()
        .variable(Variable::new("joined").default_value(""))
        .variable(Variable::new("suffix").default_value("c"))
        .activity(
            Activity::script_task("join", "joined + item")
                .multi_instance(
                    MultiInstance::from_bindings(
                        Variable::new("item"),
                        vec![
                            Binding::value("a"),
                            Binding::value("b"),
                            Binding::expression("suffix"),
                        ],
                    )
                    .sequential(),
                )
                .out("result", "joined"),
        );
    let summary = run(workflow).await.unwrap();
    assert_eq!(summary.variables["joined"], json!("abc"));
}

#[tokio::test]
async fn collection_from_variable_with_typed_elements() {
    let workflow = Workflow::new()
        .variable(Variable::new("amounts").default_value(json!(["1", "2"])))
        .variable(Variable::new("last"))
        .activity(
            Activity::script_task("bump", "item + 1")
                .multi_instance(
                    MultiInstance::new(
                        Variable::new("item").data_type(DataType::Number),
                        Binding::expression("amounts"),
                    )
                    .sequential(),
                )
                .out("result", "last"),
        );
    let summary = run(workflow).await.unwrap();
    assert_eq!(summary.variables["last"], json!(3));
}

#[tokio::test]
async fn scalar_collection_is_rejected() {
    let err = run(fan_out(each(json!(5)), "item")).await.unwrap_err();
    assert_eq!(err.code, "PF-EXEC-006");
    assert_eq!(err.category, ErrorCategory::EvaluationError);
}

#[tokio::test]
async fn failing_child_fails_the_activity() {
    let script = "if item == 2 { throw \"bad item\"; } item";

    let err = run(fan_out(each(json!([1, 2, 3])).sequential(), script))
        .await
        .unwrap_err();
    assert_eq!(err.code, "PF-EXEC-007");
    assert_eq!(err.detail("child_code"), Some("PF-EXPR-002"));
    assert_eq!(err.detail("activity_id"), Some("each"));

    let err = run(fan_out(each(json!([1, 2, 3])).parallel(), script))
        .await
        .unwrap_err();
    assert_eq!(err.code, "PF-EXEC-007");
}
