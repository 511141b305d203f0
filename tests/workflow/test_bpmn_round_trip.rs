use procflow::core::error::CONTEXT_ELEMENT_PATH;
use procflow::core::types::ErrorCategory;
use procflow::core::workflow::bpmn::{read_workflow, write_workflow, BPMN_NS, PROCFLOW_NS};
use procflow::core::workflow::model::{
    Activity, Binding, CompletionCondition, Condition, MultiInstance, Timer, Transition,
    Variable, Workflow,
};
use procflow::core::workflow::{DataType, ExpressionService, ParserSettings, WorkflowParser};
use std::sync::Arc;

fn rich_workflow() -> Workflow {
    Workflow::new()
        .id("invoice")
        .name("Invoice approval")
        .description("Approves large invoices")
        .owner_group_id("finance")
        .variable(Variable::new("amount").data_type(DataType::Number).default_value(0))
        .variable(Variable::new("approved"))
        .timer(Timer::new("reminder").duration("15m"))
        .activity(Activity::start_event("start").transition_to_next())
        .activity(
            Activity::exclusive_gateway("check")
                .in_expression("amount", "amount")
                .transition(
                    Transition::new()
                        .id("large")
                        .condition(Condition::expr("amount > 100"))
                        .to("review"),
                )
                .transition(Transition::new().id("small").to("approve"))
                .default_transition_id("small"),
        )
        .activity(
            Activity::sub_process("review")
                .variable(Variable::new("verdict").default_value("pending"))
                .activity(
                    Activity::script_task("decide", "verdict = \"ok\"; true")
                        .in_value_typed("threshold", "500", DataType::Number)
                        .out("result", "approved")
                        .transition_to_next(),
                )
                .activity(Activity::end_event("reviewed"))
                .transition_to("approve"),
        )
        .activity(
            Activity::none_task("approve")
                .in_list_binding("recipients", Binding::value("audit"))
                .in_list_binding("recipients", Binding::expression("owner"))
                .in_value("notify", true)
                .multi_instance(
                    MultiInstance::new(Variable::new("recipient"), Binding::expression("recipients"))
                        .sequential()
                        .completion(CompletionCondition::Expression(
                            "nrOfCompletedInstances >= 1".to_string(),
                        )),
                )
                .transition(
                    Transition::new()
                        .condition(Condition::Bool(true))
                        .to("end"),
                ),
        )
        .activity(Activity::end_event("end"))
}

#[test]
fn write_then_read_is_identity_modulo_normalization() {
    let workflow = rich_workflow();
    let text = write_workflow(&workflow, 8).unwrap();
    let back = read_workflow(&text, 8).unwrap();
    assert_eq!(back.normalized(), workflow.normalized());
}

#[test]
fn scope_level_flows_fold_onto_their_source() {
    let workflow = Workflow::new()
        .activity(Activity::none_task("a"))
        .activity(Activity::end_event("b"))
        .transition(Transition::new().id("f").from("a").to("b"));
    let back = read_workflow(&write_workflow(&workflow, 8).unwrap(), 8).unwrap();
    assert_eq!(back.normalized(), workflow.normalized());
    assert_eq!(
        back.scope.find_activity("a").unwrap().outgoing_transitions[0].id.as_deref(),
        Some("f")
    );
}

#[test]
fn vendor_extensions_use_pf_namespace() {
    let text = write_workflow(&rich_workflow(), 8).unwrap();
    assert!(text.contains(BPMN_NS));
    assert!(text.contains(PROCFLOW_NS));
    assert!(text.contains("pf:inputParameter"));
    assert!(text.contains("pf:defaultTransitionId=\"small\""));
    assert!(text.contains("<multiInstanceLoopCharacteristics/>"));
}

#[test]
fn standard_marker_alone_does_not_create_multi_instance() {
    let text = format!(
        r#"<definitions xmlns="{}" xmlns:pf="{}">
  <process id="p">
    <task id="each">
      <multiInstanceLoopCharacteristics/>
    </task>
  </process>
</definitions>"#,
        BPMN_NS, PROCFLOW_NS
    );
    let workflow = read_workflow(&text, 8).unwrap();
    assert!(workflow
        .scope
        .find_activity("each")
        .unwrap()
        .multi_instance
        .is_none());
}

#[test]
fn malformed_documents_are_interchange_errors() {
    let unbalanced = format!(r#"<definitions xmlns="{}"><process id="p">"#, BPMN_NS);
    let err = read_workflow(&unbalanced, 8).unwrap_err();
    assert_eq!(err.category, ErrorCategory::InterchangeError);

    let missing_id = format!(
        r#"<definitions xmlns="{}"><process id="p"><task/></process></definitions>"#,
        BPMN_NS
    );
    let err = read_workflow(&missing_id, 8).unwrap_err();
    assert_eq!(err.category, ErrorCategory::InterchangeError);
    assert!(err.detail(CONTEXT_ELEMENT_PATH).is_some());
}

#[test]
fn workflow_helpers_use_the_default_depth() {
    let workflow = rich_workflow();
    let text = workflow.to_bpmn_string().unwrap();
    assert_eq!(
        Workflow::from_bpmn_str(&text).unwrap().normalized(),
        workflow.normalized()
    );
}

fn sub_process_chain(levels: usize) -> Workflow {
    let mut innermost = Activity::none_task("leaf");
    for level in (0..levels).rev() {
        innermost = Activity::sub_process(format!("level{}", level)).activity(innermost);
    }
    Workflow::new().activity(innermost)
}

#[test]
fn configured_depth_bounds_reading_and_writing() {
    let workflow = sub_process_chain(40);
    let parser = WorkflowParser::new(
        Arc::new(ExpressionService::default()),
        ParserSettings {
            max_nesting_depth: 64,
            ..ParserSettings::default()
        },
    );
    assert!(parser.parse(&workflow).is_ok());

    assert_eq!(workflow.to_bpmn_string().unwrap_err().code, "PF-XML-009");
    let text = workflow.to_bpmn_string_with_depth(64).unwrap();
    assert_eq!(Workflow::from_bpmn_str(&text).unwrap_err().code, "PF-XML-009");
    assert_eq!(
        Workflow::from_bpmn_str_with_depth(&text, 64).unwrap().normalized(),
        workflow.normalized()
    );
}
