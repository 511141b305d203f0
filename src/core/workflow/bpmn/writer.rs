#![allow(clippy::result_large_err)]

use super::xml::{render_document, Prefixes, XmlElement};
use super::{BPMN_NS, PROCFLOW_NS, PROCFLOW_PREFIX};
use crate::core::error::{AppError, CONTEXT_ACTIVITY_ID};
use crate::core::types::ErrorCategory;
use crate::core::workflow::data::DataType;
use crate::core::workflow::model::{
    Activity, ActivityKind, Binding, BindingSource, CompletionCondition, Condition,
    InputParameter, MultiInstance, MultiInstanceMode, Scope, Transition, Variable, Workflow,
};
use serde_json::Value;

/// Builder cursor producing an element tree: `start` opens an element under
/// the current one, `end` closes it.
#[derive(Default)]
pub struct BpmnWriter {
    open: Vec<XmlElement>,
    root: Option<XmlElement>,
}

impl BpmnWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, namespace: &str, local: &str) {
        self.open.push(XmlElement::new(Some(namespace), local));
    }

    pub fn attribute(&mut self, namespace: Option<&str>, local: &str, value: impl Into<String>) {
        if let Some(element) = self.open.last_mut() {
            element.set_attribute(namespace, local, value);
        }
    }

    pub fn optional_attribute(&mut self, namespace: Option<&str>, local: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.attribute(namespace, local, value);
        }
    }

    pub fn text(&mut self, text: &str) {
        if let Some(element) = self.open.last_mut() {
            element.text.push_str(text);
        }
    }

    pub fn end(&mut self) {
        if let Some(element) = self.open.pop() {
            match self.open.last_mut() {
                Some(parent) => parent.children.push(element),
                None => self.root = Some(element),
            }
        }
    }

    /// Render the finished tree.
    pub fn finish(self) -> Result<String, AppError> {
        if !self.open.is_empty() {
            return Err(AppError::new(
                ErrorCategory::InternalError,
                format!("{} BPMN elements left open", self.open.len()),
            )
            .with_code("PF-XML-008"));
        }
        let root = self.root.ok_or_else(|| {
            AppError::new(ErrorCategory::InternalError, "no BPMN element written")
                .with_code("PF-XML-008")
        })?;
        render_document(
            &root,
            &Prefixes(&[(BPMN_NS, ""), (PROCFLOW_NS, PROCFLOW_PREFIX)]),
        )
    }
}

/// Serialize a workflow definition as a BPMN document. Definitions nesting
/// scopes deeper than `max_scope_depth` are refused before anything is
/// written, matching what [`read_workflow`](super::read_workflow) accepts.
pub fn write_workflow(workflow: &Workflow, max_scope_depth: usize) -> Result<String, AppError> {
    check_scope_depth(&workflow.scope, max_scope_depth)?;
    let mut writer = BpmnWriter::new();
    writer.start(BPMN_NS, "definitions");
    writer.attribute(None, "targetNamespace", "urn:procflow:workflows");

    writer.start(BPMN_NS, "process");
    writer.optional_attribute(None, "id", workflow.id.as_ref().map(|id| id.as_str()));
    writer.optional_attribute(None, "name", workflow.name.as_deref());
    writer.attribute(None, "isExecutable", "true");
    writer.optional_attribute(
        Some(PROCFLOW_NS),
        "sourceWorkflowId",
        workflow.source_workflow_id.as_deref(),
    );
    writer.optional_attribute(
        Some(PROCFLOW_NS),
        "ownerGroupId",
        workflow.owner_group_id.as_ref().map(|id| id.as_str()),
    );
    writer.optional_attribute(
        Some(PROCFLOW_NS),
        "creatorId",
        workflow.creator_id.as_ref().map(|id| id.as_str()),
    );
    if let Some(description) = &workflow.description {
        writer.start(BPMN_NS, "documentation");
        writer.text(description);
        writer.end();
    }
    if has_scope_extensions(&workflow.scope) {
        writer.start(BPMN_NS, "extensionElements");
        write_scope_extensions(&mut writer, &workflow.scope);
        writer.end();
    }
    write_scope_body(&mut writer, &workflow.scope);
    writer.end();

    writer.end();
    writer.finish()
}

fn check_scope_depth(root: &Scope, max_scope_depth: usize) -> Result<(), AppError> {
    let mut pending = vec![(0_usize, root)];
    while let Some((depth, scope)) = pending.pop() {
        for activity in &scope.activities {
            if depth + 1 > max_scope_depth {
                return Err(AppError::new(
                    ErrorCategory::SerializationError,
                    format!(
                        "scope nesting exceeds {} at activity {}",
                        max_scope_depth, activity.id
                    ),
                )
                .with_code("PF-XML-009")
                .with_detail(CONTEXT_ACTIVITY_ID, activity.id.as_str()));
            }
            pending.push((depth + 1, &activity.scope));
        }
    }
    Ok(())
}

fn has_scope_extensions(scope: &Scope) -> bool {
    !scope.variables.is_empty() || !scope.timers.is_empty() || !scope.properties.is_empty()
}

fn write_scope_extensions(writer: &mut BpmnWriter, scope: &Scope) {
    for variable in &scope.variables {
        writer.start(PROCFLOW_NS, "variable");
        write_variable_attributes(writer, variable);
        writer.end();
    }
    for timer in &scope.timers {
        writer.start(PROCFLOW_NS, "timer");
        writer.attribute(None, "id", timer.id.as_str());
        writer.optional_attribute(None, "duration", timer.duration.as_deref());
        writer.optional_attribute(
            None,
            "dueDateExpression",
            timer.due_date_expression.as_deref(),
        );
        writer.optional_attribute(None, "repeat", timer.repeat.as_deref());
        writer.end();
    }
    for (key, value) in &scope.properties {
        writer.start(PROCFLOW_NS, "property");
        writer.attribute(None, "key", key.as_str());
        write_literal(writer, value);
        writer.end();
    }
}

/// Activities first, then one sequence flow per outgoing transition, then
/// the scope-level transitions.
fn write_scope_body(writer: &mut BpmnWriter, scope: &Scope) {
    for activity in &scope.activities {
        write_activity(writer, activity);
    }
    for activity in &scope.activities {
        for transition in &activity.outgoing_transitions {
            write_flow(writer, Some(activity.id.as_str()), transition);
        }
    }
    for transition in &scope.transitions {
        write_flow(writer, transition.from.as_deref(), transition);
    }
}

fn element_name(kind: &ActivityKind) -> &'static str {
    match kind {
        ActivityKind::StartEvent => "startEvent",
        ActivityKind::EndEvent => "endEvent",
        ActivityKind::NoneTask => "task",
        ActivityKind::ScriptTask { .. } => "scriptTask",
        ActivityKind::ExclusiveGateway => "exclusiveGateway",
        ActivityKind::SubProcess => "subProcess",
        ActivityKind::ServiceTask { .. } => "serviceTask",
    }
}

fn write_activity(writer: &mut BpmnWriter, activity: &Activity) {
    writer.start(BPMN_NS, element_name(&activity.kind));
    writer.attribute(None, "id", activity.id.as_str());
    writer.optional_attribute(None, "name", activity.name.as_deref());
    if let ActivityKind::ServiceTask { service_type } = &activity.kind {
        writer.attribute(Some(PROCFLOW_NS), "type", service_type.as_str());
    }
    writer.optional_attribute(
        Some(PROCFLOW_NS),
        "defaultTransitionId",
        activity.default_transition_id.as_deref(),
    );

    let has_extensions = activity.multi_instance.is_some()
        || !activity.inputs.is_empty()
        || !activity.out.is_empty()
        || has_scope_extensions(&activity.scope);
    if has_extensions {
        writer.start(BPMN_NS, "extensionElements");
        if let Some(multi_instance) = &activity.multi_instance {
            write_multi_instance(writer, multi_instance);
        }
        for (key, parameter) in &activity.inputs {
            writer.start(PROCFLOW_NS, "inputParameter");
            writer.attribute(None, "key", key.as_str());
            write_bindings(writer, parameter);
            writer.end();
        }
        for (key, parameter) in &activity.out {
            writer.start(PROCFLOW_NS, "outputParameter");
            writer.attribute(None, "key", key.as_str());
            writer.attribute(None, "id", parameter.variable_id.as_str());
            writer.end();
        }
        write_scope_extensions(writer, &activity.scope);
        writer.end();
    }

    // Standard marker so other BPMN tools see the loop; the reader relies on
    // pf:multiInstance alone.
    if activity.multi_instance.is_some() {
        writer.start(BPMN_NS, "multiInstanceLoopCharacteristics");
        writer.end();
    }

    if let ActivityKind::ScriptTask { script } = &activity.kind {
        writer.start(BPMN_NS, "script");
        writer.text(script);
        writer.end();
    }

    write_scope_body(writer, &activity.scope);
    writer.end();
}

fn write_multi_instance(writer: &mut BpmnWriter, multi_instance: &MultiInstance) {
    writer.start(PROCFLOW_NS, "multiInstance");
    if multi_instance.mode == MultiInstanceMode::Sequential {
        writer.attribute(None, "mode", multi_instance.mode.to_string());
    }
    match &multi_instance.completion {
        CompletionCondition::All => {}
        CompletionCondition::Any => writer.attribute(None, "completion", "any"),
        CompletionCondition::Expression(_) => writer.attribute(None, "completion", "expression"),
    }

    writer.start(PROCFLOW_NS, "collection");
    write_bindings(writer, &multi_instance.collection);
    writer.end();

    writer.start(PROCFLOW_NS, "elementVariable");
    write_variable_attributes(writer, &multi_instance.element_variable);
    writer.end();

    if let CompletionCondition::Expression(expression) = &multi_instance.completion {
        writer.start(PROCFLOW_NS, "completionCondition");
        writer.text(expression);
        writer.end();
    }
    writer.end();
}

fn write_bindings(writer: &mut BpmnWriter, parameter: &InputParameter) {
    for binding in parameter.bindings() {
        write_binding(writer, binding);
    }
}

fn write_binding(writer: &mut BpmnWriter, binding: &Binding) {
    writer.start(PROCFLOW_NS, "binding");
    match &binding.source {
        BindingSource::Value(value) => write_literal(writer, value),
        BindingSource::Expression(expression) => {
            writer.attribute(None, "expression", expression.as_str())
        }
    }
    write_data_type(writer, binding.data_type.as_ref());
    writer.end();
}

fn write_variable_attributes(writer: &mut BpmnWriter, variable: &Variable) {
    writer.attribute(None, "id", variable.id.as_str());
    write_data_type(writer, variable.data_type.as_ref());
    if let Some(value) = &variable.default_value {
        write_literal(writer, value);
    }
}

fn write_data_type(writer: &mut BpmnWriter, data_type: Option<&DataType>) {
    if let Some(data_type) = data_type {
        writer.attribute(None, "type", data_type.name());
    }
}

/// Strings go to `value`, every other literal to `json`.
fn write_literal(writer: &mut BpmnWriter, value: &Value) {
    match value {
        Value::String(text) => writer.attribute(None, "value", text.as_str()),
        other => writer.attribute(None, "json", other.to_string()),
    }
}

fn write_flow(writer: &mut BpmnWriter, source: Option<&str>, transition: &Transition) {
    writer.start(BPMN_NS, "sequenceFlow");
    writer.optional_attribute(None, "id", transition.id.as_deref());
    writer.optional_attribute(None, "sourceRef", source);
    writer.optional_attribute(None, "targetRef", transition.to.as_deref());
    if transition.to_next {
        writer.attribute(Some(PROCFLOW_NS), "toNext", "true");
    }
    match &transition.condition {
        Some(Condition::Expr { expr }) => {
            writer.start(BPMN_NS, "conditionExpression");
            writer.text(expr);
            writer.end();
        }
        Some(Condition::Bool(literal)) => {
            writer.start(BPMN_NS, "conditionExpression");
            writer.attribute(Some(PROCFLOW_NS), "literal", literal.to_string());
            writer.end();
        }
        None => {}
    }
    writer.end();
}
