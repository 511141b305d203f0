use procflow::core::error::{AppError, CONTEXT_ACTIVITY_ID, CONTEXT_SCOPE_PATH};
use procflow::core::types::ErrorCategory;
use procflow::core::workflow::model::{Activity, Condition, Timer, Transition, Workflow};
use procflow::core::workflow::{
    ExecutableWorkflow, ExpressionService, IssueSeverity, ParserSettings, WorkflowParseListener,
    WorkflowParser,
};
use std::sync::{Arc, Mutex};

fn parser() -> WorkflowParser {
    WorkflowParser::new(
        Arc::new(ExpressionService::default()),
        ParserSettings::default(),
    )
}

fn approval() -> Workflow {
    Workflow::new()
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
        .activity(Activity::none_task("review").transition_to("done"))
        .activity(Activity::end_event("done"))
}

struct Recorder(Mutex<Vec<String>>);

impl WorkflowParseListener for Recorder {
    fn on_parsed(
        &self,
        _workflow: &Workflow,
        executable: &ExecutableWorkflow,
        _parser: &WorkflowParser,
    ) -> Result<(), AppError> {
        self.0
            .lock()
            .unwrap()
            .push(executable.fingerprint().to_string());
        Ok(())
    }
}

struct Rejecting;

impl WorkflowParseListener for Rejecting {
    fn on_parsed(
        &self,
        _workflow: &Workflow,
        _executable: &ExecutableWorkflow,
        _parser: &WorkflowParser,
    ) -> Result<(), AppError> {
        Err(AppError::new(ErrorCategory::DefinitionError, "rejected by policy").with_code("POLICY"))
    }
}

#[test]
fn parse_resolves_transitions_and_start() {
    let executable = parser().parse(&approval()).unwrap();
    let root = executable.root();
    let starts: Vec<&str> = root.start_activities().map(|a| a.id()).collect();
    assert_eq!(starts, vec!["start"]);

    let check = root.activity("check").unwrap();
    assert_eq!(check.transitions.len(), 1);
    assert_eq!(check.default_transition.as_ref().unwrap().target, "done");
    assert_eq!(root.activity("start").unwrap().transitions[0].target, "check");
    assert!(executable.issues().is_empty());
}

#[test]
fn listeners_see_every_successful_parse() {
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let mut parser = parser();
    parser.add_listener(recorder.clone());
    assert_eq!(parser.listener_count(), 1);

    let first = parser.parse(&approval()).unwrap();
    let second = parser.parse(&approval()).unwrap();
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(recorder.0.lock().unwrap().len(), 2);
}

#[test]
fn failing_listener_aborts_parse() {
    let mut parser = parser();
    parser.add_listener(Arc::new(Rejecting));
    let err = parser.parse(&approval()).unwrap_err();
    assert_eq!(err.code, "POLICY");
}

#[test]
fn duplicate_ids_report_scope_and_activity() {
    let workflow = Workflow::new().activity(
        Activity::sub_process("outer")
            .activity(Activity::none_task("twin"))
            .activity(Activity::none_task("twin")),
    );
    let err = parser().parse(&workflow).unwrap_err();
    assert_eq!(err.category, ErrorCategory::DefinitionError);
    assert_eq!(err.code, "PF-DEF-001");
    assert_eq!(err.detail(CONTEXT_SCOPE_PATH), Some("/outer"));
    assert_eq!(err.detail(CONTEXT_ACTIVITY_ID), Some("twin"));
}

#[test]
fn unresolved_references_are_definition_errors() {
    let unknown_target = Workflow::new().activity(Activity::none_task("a").transition_to("ghost"));
    assert_eq!(parser().parse(&unknown_target).unwrap_err().code, "PF-DEF-002");

    let next_of_last = Workflow::new().activity(Activity::none_task("a").transition_to_next());
    assert_eq!(parser().parse(&next_of_last).unwrap_err().code, "PF-DEF-003");

    let unknown_default = Workflow::new()
        .activity(Activity::exclusive_gateway("g").default_transition_id("missing"));
    assert_eq!(parser().parse(&unknown_default).unwrap_err().code, "PF-DEF-005");

    let dangling = Workflow::new()
        .activity(Activity::none_task("a"))
        .transition(Transition::new().from("ghost").to("a"));
    assert_eq!(parser().parse(&dangling).unwrap_err().code, "PF-DEF-006");
}

#[test]
fn warnings_do_not_fail_parse() {
    let workflow = approval().activity(Activity::none_task("island"));
    let executable = parser().parse(&workflow).unwrap();
    let codes: Vec<&str> = executable.issues().iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["PF-LINT-001"]);
    assert_eq!(executable.issues()[0].location.as_deref(), Some("/island"));
}

#[test]
fn lint_collects_and_sorts_everything() {
    let workflow = Workflow::new()
        .timer(Timer::new("late").duration("whenever"))
        .activity(Activity::none_task("a").transition_to_next())
        .activity(Activity::script_task("b", "1 +").transition_to("a"))
        .activity(Activity::none_task("bad id"));
    let issues = parser().lint(&workflow);
    let codes: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();

    assert!(codes.contains(&"PF-LINT-003"));
    assert!(codes.contains(&"PF-EXPR-001"));
    assert!(codes.contains(&"PF-LINT-005"));
    assert!(codes.contains(&"PF-LINT-002"));

    let ranks: Vec<IssueSeverity> = issues.iter().map(|i| i.severity).collect();
    let first_warning = ranks
        .iter()
        .position(|s| *s != IssueSeverity::Error)
        .unwrap();
    assert!(ranks[first_warning..]
        .iter()
        .all(|s| *s != IssueSeverity::Error));
    assert_eq!(issues.last().unwrap().severity, IssueSeverity::Info);
}

#[test]
fn lint_issues_serialize_for_tooling() {
    let workflow = approval().activity(Activity::none_task("island"));
    let issues = parser().lint(&workflow);
    let value = serde_json::to_value(&issues).unwrap();
    assert_eq!(value[0]["code"], "PF-LINT-001");
    assert_eq!(value[0]["severity"], "warning");
}
