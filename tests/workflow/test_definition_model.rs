use procflow::core::workflow::model::{
    Activity, Binding, DocumentFormat, InputParameter, MultiInstance, Transition, Variable,
    Workflow,
};
use procflow::core::workflow::{DataType, GroupId};
use serde_json::json;

fn order_workflow() -> Workflow {
    Workflow::new()
        .id("order")
        .name("Order handling")
        .owner_group_id("sales")
        .variable(Variable::new("amount").data_type(DataType::Number).default_value(0))
        .activity(Activity::start_event("start").transition_to_next())
        .activity(
            Activity::script_task("price", "amount * 2")
                .in_value("currency", "EUR")
                .in_expression("doubled", "amount * 2")
                .out("result", "amount"),
        )
        .activity(Activity::end_event("end"))
        .transition(Transition::new().from("price").to("end"))
}

#[test]
fn builders_keep_declaration_order() {
    let workflow = order_workflow();
    let ids: Vec<&str> = workflow
        .scope
        .activities
        .iter()
        .map(|activity| activity.id.as_str())
        .collect();
    assert_eq!(ids, vec!["start", "price", "end"]);

    let price = workflow.scope.find_activity("price").unwrap();
    let keys: Vec<&str> = price.inputs.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["currency", "doubled"]);
    assert_eq!(price.out["result"].variable_id, "amount");
}

#[test]
fn list_bindings_append_and_single_bindings_replace() {
    let activity = Activity::none_task("collect")
        .in_binding("target", Binding::value(1))
        .in_binding("target", Binding::value(2))
        .in_list_binding("items", Binding::value("a"))
        .in_list_binding("items", Binding::expression("amount"));

    assert_eq!(
        activity.inputs["target"],
        InputParameter::Single(Binding::value(2))
    );
    assert!(activity.inputs["items"].is_multiple());
    assert_eq!(activity.inputs["items"].bindings().len(), 2);
    assert_eq!(
        activity.inputs["items"].bindings()[1].expression_text(),
        Some("amount")
    );
}

#[test]
fn normalization_moves_scope_transitions_onto_sources() {
    let normalized = order_workflow().normalized();
    assert!(normalized.scope.transitions.is_empty());
    let price = normalized.scope.find_activity("price").unwrap();
    assert_eq!(price.outgoing_transitions.len(), 1);
    assert_eq!(price.outgoing_transitions[0].to.as_deref(), Some("end"));
    assert_eq!(normalized, normalized.normalized());
}

#[test]
fn nested_scopes_are_addressed_by_path() {
    let workflow = Workflow::new().activity(
        Activity::sub_process("review")
            .variable(Variable::new("verdict"))
            .activity(Activity::none_task("check").transition_to_next())
            .activity(Activity::end_event("done")),
    );
    let paths: Vec<String> = workflow
        .activities()
        .iter()
        .map(|(path, activity)| path.activity(&activity.id))
        .collect();
    assert_eq!(paths, vec!["/review", "/review/check", "/review/done"]);
    assert!(workflow.scope.find_activity("review").unwrap().is_container());
}

#[test]
fn json_and_yaml_round_trip() {
    let workflow = order_workflow().activity(
        Activity::none_task("each")
            .multi_instance(MultiInstance::new(Variable::new("item"), Binding::expression("items")).sequential()),
    );

    let json = workflow.render(DocumentFormat::Json).unwrap();
    assert_eq!(
        Workflow::parse_str(&json, DocumentFormat::Json).unwrap(),
        workflow
    );

    let yaml = workflow.render(DocumentFormat::Yaml).unwrap();
    assert_eq!(
        Workflow::parse_str(&yaml, DocumentFormat::Yaml).unwrap(),
        workflow
    );
}

#[test]
fn group_id_is_a_bare_token() {
    assert_eq!(GroupId::from_token(None), None);
    assert_eq!(GroupId::from_token(Some("")), None);
    let group = GroupId::from_token(Some("sales")).unwrap();
    assert_eq!(group.as_str(), "sales");
    assert_eq!(group.to_string(), "sales");
    assert_eq!(serde_json::to_value(&group).unwrap(), json!("sales"));

    let workflow = Workflow::from_json_str(r#"{"ownerGroupId": null}"#).unwrap();
    assert!(workflow.owner_group_id.is_none());
    let workflow = Workflow::from_json_str(r#"{"ownerGroupId": "ops"}"#).unwrap();
    assert_eq!(workflow.owner_group_id, Some(GroupId::new("ops")));
}

#[test]
fn malformed_json_is_an_interchange_error() {
    let err = Workflow::from_json_str("{ not json").unwrap_err();
    assert_eq!(err.code, "PF-XML-011");
}
