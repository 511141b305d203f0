#![allow(clippy::result_large_err)]

use super::xml::{parse_document, XmlElement};
use super::{BPMN_NS, ELEMENT_DEPTH_SLACK, PROCFLOW_NS, PROCFLOW_PREFIX};
use crate::core::error::{AppError, CONTEXT_ELEMENT_PATH};
use crate::core::types::ErrorCategory;
use crate::core::workflow::data::DataType;
use crate::core::workflow::ids::{GroupId, UserId, WorkflowId};
use crate::core::workflow::model::{
    Activity, ActivityKind, Binding, CompletionCondition, Condition, InputParameter,
    MultiInstance, MultiInstanceMode, OutputParameter, Scope, Timer, Transition, Variable,
    Workflow,
};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

struct Frame {
    label: String,
    element: XmlElement,
    children: VecDeque<XmlElement>,
}

/// Cursor over a parsed document. Each entered element becomes a frame whose
/// children are consumed as they are read.
pub struct BpmnReader {
    frames: Vec<Frame>,
    scope_depth: usize,
    max_scope_depth: usize,
}

impl BpmnReader {
    pub fn new(root: XmlElement, max_scope_depth: usize) -> Self {
        let mut reader = Self {
            frames: Vec::new(),
            scope_depth: 0,
            max_scope_depth,
        };
        reader.enter(root);
        reader
    }

    pub fn enter(&mut self, mut element: XmlElement) {
        let children = VecDeque::from(std::mem::take(&mut element.children));
        let label = self.label_for(&element);
        self.frames.push(Frame {
            label,
            element,
            children,
        });
    }

    pub fn exit(&mut self) {
        self.frames.pop();
    }

    fn label_for(&self, element: &XmlElement) -> String {
        let name = if element.namespace.as_deref() == Some(PROCFLOW_NS) {
            format!("{}:{}", PROCFLOW_PREFIX, element.local)
        } else {
            element.local.clone()
        };
        // definitions and process are unique; deeper elements are told apart by id or key.
        if self.frames.len() < 2 {
            return name;
        }
        match element
            .attribute(None, "id")
            .or_else(|| element.attribute(None, "key"))
        {
            Some(id) => format!("{}[{}]", name, id),
            None => name,
        }
    }

    /// Slash separated path of the element under the cursor.
    pub fn path(&self) -> String {
        self.frames
            .iter()
            .map(|frame| frame.label.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn current(&self) -> Option<&XmlElement> {
        self.frames.last().map(|frame| &frame.element)
    }

    pub fn error(&self, message: impl Into<String>, code: &str) -> AppError {
        AppError::new(ErrorCategory::InterchangeError, message)
            .with_code(code)
            .with_detail(CONTEXT_ELEMENT_PATH, self.path())
    }

    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<String> {
        self.current()
            .and_then(|element| element.attribute(namespace, local))
            .map(str::to_string)
    }

    pub fn required_attribute(&self, namespace: Option<&str>, local: &str) -> Result<String, AppError> {
        self.attribute(namespace, local).ok_or_else(|| {
            let name = match namespace {
                Some(PROCFLOW_NS) => format!("{}:{}", PROCFLOW_PREFIX, local),
                _ => local.to_string(),
            };
            self.error(format!("missing required attribute '{}'", name), "PF-XML-003")
        })
    }

    pub fn text(&self) -> String {
        self.current()
            .map(|element| element.text.clone())
            .unwrap_or_default()
    }

    pub fn next_child(&mut self) -> Option<XmlElement> {
        self.frames
            .last_mut()
            .and_then(|frame| frame.children.pop_front())
    }

    /// Remove the first child named `namespace:local`, keeping the others queued.
    pub fn take_child(&mut self, namespace: &str, local: &str) -> Option<XmlElement> {
        let frame = self.frames.last_mut()?;
        let index = frame
            .children
            .iter()
            .position(|child| child.is(namespace, local))?;
        frame.children.remove(index)
    }

    fn enter_scope(&mut self) -> Result<(), AppError> {
        self.scope_depth += 1;
        if self.scope_depth > self.max_scope_depth {
            return Err(self.error(
                format!("scope nesting exceeds {}", self.max_scope_depth),
                "PF-XML-009",
            ));
        }
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.scope_depth = self.scope_depth.saturating_sub(1);
    }
}

/// Parse a BPMN document into a workflow definition.
pub fn read_workflow(text: &str, max_scope_depth: usize) -> Result<Workflow, AppError> {
    let root = parse_document(text, max_scope_depth + ELEMENT_DEPTH_SLACK)?;
    let mut reader = BpmnReader::new(root, max_scope_depth);

    let is_definitions = reader
        .current()
        .map(|root| root.is(BPMN_NS, "definitions"))
        .unwrap_or(false);
    if !is_definitions {
        return Err(reader.error(
            "root element must be BPMN <definitions>",
            "PF-XML-002",
        ));
    }

    let process = reader
        .take_child(BPMN_NS, "process")
        .ok_or_else(|| reader.error("no <process> element found", "PF-XML-002"))?;
    reader.enter(process);
    let workflow = read_process(&mut reader)?;
    reader.exit();

    debug!(
        workflow_id = workflow.id.as_ref().map(|id| id.as_str()).unwrap_or(""),
        activities = workflow.activities().len(),
        "read BPMN workflow"
    );
    Ok(workflow)
}

fn read_process(reader: &mut BpmnReader) -> Result<Workflow, AppError> {
    let mut workflow = Workflow {
        id: reader.attribute(None, "id").map(WorkflowId::new),
        name: reader.attribute(None, "name"),
        source_workflow_id: reader.attribute(Some(PROCFLOW_NS), "sourceWorkflowId"),
        owner_group_id: GroupId::from_token(
            reader.attribute(Some(PROCFLOW_NS), "ownerGroupId").as_deref(),
        ),
        creator_id: UserId::from_token(reader.attribute(Some(PROCFLOW_NS), "creatorId").as_deref()),
        ..Workflow::default()
    };
    if let Some(documentation) = reader.take_child(BPMN_NS, "documentation") {
        workflow.description = Some(documentation.text);
    }
    if let Some(extensions) = reader.take_child(BPMN_NS, "extensionElements") {
        read_scope_extensions(reader, extensions, &mut workflow.scope)?;
    }
    read_scope_body(reader, &mut workflow.scope)?;
    Ok(workflow)
}

fn activity_kind(reader: &mut BpmnReader, local: &str) -> Result<Option<ActivityKind>, AppError> {
    let kind = match local {
        "task" => ActivityKind::NoneTask,
        "startEvent" => ActivityKind::StartEvent,
        "endEvent" => ActivityKind::EndEvent,
        "exclusiveGateway" => ActivityKind::ExclusiveGateway,
        "subProcess" => ActivityKind::SubProcess,
        "scriptTask" => {
            let script = reader
                .take_child(BPMN_NS, "script")
                .ok_or_else(|| reader.error("scriptTask without <script>", "PF-XML-003"))?;
            ActivityKind::ScriptTask {
                script: script.text,
            }
        }
        "serviceTask" => ActivityKind::ServiceTask {
            service_type: reader.required_attribute(Some(PROCFLOW_NS), "type")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

/// Read the standard children of a scope: activities, sequence flows and
/// any further extension block. Flows are attached once every activity of
/// the scope is known.
fn read_scope_body(reader: &mut BpmnReader, scope: &mut Scope) -> Result<(), AppError> {
    let mut flows = Vec::new();
    while let Some(child) = reader.next_child() {
        if child.namespace.as_deref() != Some(BPMN_NS) {
            // Foreign markup such as diagram interchange is not part of the model.
            continue;
        }
        match child.local.as_str() {
            "sequenceFlow" => flows.push(read_flow(reader, child)?),
            "extensionElements" => read_scope_extensions(reader, child, scope)?,
            "documentation" | "multiInstanceLoopCharacteristics" | "incoming" | "outgoing" => {}
            _ => {
                let local = child.local.clone();
                reader.enter(child);
                let activity = match activity_kind(reader, &local)? {
                    Some(kind) => read_activity(reader, kind)?,
                    None => {
                        return Err(reader.error(
                            format!("unknown element <{}> in scope", local),
                            "PF-XML-004",
                        ))
                    }
                };
                reader.exit();
                scope.activities.push(activity);
            }
        }
    }

    for mut flow in flows {
        let owner = flow
            .from
            .as_deref()
            .and_then(|from| scope.activities.iter().position(|a| a.id == from));
        match owner {
            Some(index) => {
                flow.from = None;
                scope.activities[index].outgoing_transitions.push(flow);
            }
            None => scope.transitions.push(flow),
        }
    }
    Ok(())
}

fn read_activity(reader: &mut BpmnReader, kind: ActivityKind) -> Result<Activity, AppError> {
    reader.enter_scope()?;
    let id = reader.required_attribute(None, "id")?;
    let mut activity = Activity::new(id, kind);
    activity.name = reader.attribute(None, "name");
    activity.default_transition_id = reader.attribute(Some(PROCFLOW_NS), "defaultTransitionId");

    if let Some(extensions) = reader.take_child(BPMN_NS, "extensionElements") {
        reader.enter(extensions);
        while let Some(child) = reader.next_child() {
            if child.is(PROCFLOW_NS, "multiInstance") {
                if activity.multi_instance.is_some() {
                    return Err(reader.error(
                        "more than one pf:multiInstance on an activity",
                        "PF-XML-004",
                    ));
                }
                reader.enter(child);
                activity.multi_instance = Some(read_multi_instance(reader)?);
                reader.exit();
            } else if child.is(PROCFLOW_NS, "inputParameter") {
                reader.enter(child);
                let key = reader.required_attribute(None, "key")?;
                let parameter = read_input_parameter(reader)?;
                reader.exit();
                activity.inputs.insert(key, parameter);
            } else if child.is(PROCFLOW_NS, "outputParameter") {
                reader.enter(child);
                let key = reader.required_attribute(None, "key")?;
                let variable_id = reader.required_attribute(None, "id")?;
                reader.exit();
                activity.out.insert(key, OutputParameter::new(variable_id));
            } else {
                read_scope_extension(reader, child, &mut activity.scope)?;
            }
        }
        reader.exit();
    }

    read_scope_body(reader, &mut activity.scope)?;
    reader.exit_scope();
    Ok(activity)
}

fn read_scope_extensions(
    reader: &mut BpmnReader,
    extensions: XmlElement,
    scope: &mut Scope,
) -> Result<(), AppError> {
    reader.enter(extensions);
    while let Some(child) = reader.next_child() {
        read_scope_extension(reader, child, scope)?;
    }
    reader.exit();
    Ok(())
}

/// Read one vendor element that belongs to a scope: a variable, timer or property.
fn read_scope_extension(
    reader: &mut BpmnReader,
    element: XmlElement,
    scope: &mut Scope,
) -> Result<(), AppError> {
    if element.namespace.as_deref() != Some(PROCFLOW_NS) {
        return Ok(());
    }
    let local = element.local.clone();
    reader.enter(element);
    match local.as_str() {
        "variable" => {
            let variable = read_variable(reader)?;
            scope.variables.push(variable);
        }
        "timer" => {
            let timer = Timer {
                id: reader.required_attribute(None, "id")?,
                duration: reader.attribute(None, "duration"),
                due_date_expression: reader.attribute(None, "dueDateExpression"),
                repeat: reader.attribute(None, "repeat"),
            };
            scope.timers.push(timer);
        }
        "property" => {
            let key = reader.required_attribute(None, "key")?;
            let value = read_literal(reader)?
                .ok_or_else(|| reader.error("pf:property without value or json", "PF-XML-003"))?;
            scope.properties.insert(key, value);
        }
        other => {
            return Err(reader.error(
                format!("unknown extension element pf:{}", other),
                "PF-XML-004",
            ))
        }
    }
    reader.exit();
    Ok(())
}

fn read_data_type(reader: &BpmnReader) -> Result<Option<DataType>, AppError> {
    match reader.attribute(None, "type") {
        Some(raw) => raw
            .parse::<DataType>()
            .map(Some)
            .map_err(|err| err.with_detail(CONTEXT_ELEMENT_PATH, reader.path())),
        None => Ok(None),
    }
}

/// Literal carried by a `value` (string) or `json` (any JSON) attribute.
fn read_literal(reader: &BpmnReader) -> Result<Option<Value>, AppError> {
    if let Some(text) = reader.attribute(None, "value") {
        return Ok(Some(Value::String(text)));
    }
    match reader.attribute(None, "json") {
        Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|err| {
            reader.error(format!("json attribute is not valid JSON: {}", err), "PF-XML-006")
        }),
        None => Ok(None),
    }
}

fn read_variable(reader: &BpmnReader) -> Result<Variable, AppError> {
    Ok(Variable {
        id: reader.required_attribute(None, "id")?,
        data_type: read_data_type(reader)?,
        default_value: read_literal(reader)?,
    })
}

fn read_binding(reader: &mut BpmnReader, element: XmlElement) -> Result<Binding, AppError> {
    reader.enter(element);
    if reader.attribute(None, "value").is_some() && reader.attribute(None, "json").is_some() {
        return Err(reader.error("binding declares both value and json", "PF-XML-007"));
    }
    let binding = match (read_literal(reader)?, reader.attribute(None, "expression")) {
        (Some(_), Some(_)) => {
            return Err(reader.error(
                "binding declares both a literal and an expression",
                "PF-XML-007",
            ))
        }
        (Some(value), None) => Binding::value(value),
        (None, Some(expression)) => Binding::expression(expression),
        (None, None) => {
            return Err(reader.error("binding element without a source", "PF-XML-007"))
        }
    };
    let binding = match read_data_type(reader)? {
        Some(data_type) => binding.data_type(data_type),
        None => binding,
    };
    reader.exit();
    Ok(binding)
}

/// Collect the `pf:binding` children of the current element in document order.
fn read_bindings(reader: &mut BpmnReader) -> Result<Vec<Binding>, AppError> {
    let mut bindings = Vec::new();
    while let Some(child) = reader.next_child() {
        if child.is(PROCFLOW_NS, "binding") {
            bindings.push(read_binding(reader, child)?);
        }
    }
    Ok(bindings)
}

fn read_input_parameter(reader: &mut BpmnReader) -> Result<InputParameter, AppError> {
    let mut bindings = read_bindings(reader)?;
    match bindings.len() {
        0 => Err(reader.error("parameter without any pf:binding", "PF-XML-007")),
        1 => Ok(InputParameter::Single(bindings.remove(0))),
        _ => Ok(InputParameter::Multiple(bindings)),
    }
}

fn read_multi_instance(reader: &mut BpmnReader) -> Result<MultiInstance, AppError> {
    let mode = match reader.attribute(None, "mode").as_deref() {
        None | Some("parallel") => MultiInstanceMode::Parallel,
        Some("sequential") => MultiInstanceMode::Sequential,
        Some(other) => {
            return Err(reader.error(
                format!("unknown multi-instance mode '{}'", other),
                "PF-XML-005",
            ))
        }
    };

    let collection = reader
        .take_child(PROCFLOW_NS, "collection")
        .ok_or_else(|| reader.error("pf:multiInstance without pf:collection", "PF-XML-003"))?;
    reader.enter(collection);
    let collection = read_input_parameter(reader)?;
    reader.exit();

    let element_variable = reader
        .take_child(PROCFLOW_NS, "elementVariable")
        .ok_or_else(|| reader.error("pf:multiInstance without pf:elementVariable", "PF-XML-003"))?;
    reader.enter(element_variable);
    let element_variable = read_variable(reader)?;
    reader.exit();

    let completion = match reader.take_child(PROCFLOW_NS, "completionCondition") {
        Some(condition) => CompletionCondition::Expression(condition.text),
        None => match reader.attribute(None, "completion").as_deref() {
            None | Some("all") => CompletionCondition::All,
            Some("any") => CompletionCondition::Any,
            Some(other) => {
                return Err(reader.error(
                    format!("unknown completion condition '{}'", other),
                    "PF-XML-005",
                ))
            }
        },
    };

    Ok(MultiInstance {
        collection,
        element_variable,
        mode,
        completion,
    })
}

fn read_flow(reader: &mut BpmnReader, element: XmlElement) -> Result<Transition, AppError> {
    reader.enter(element);
    let mut transition = Transition {
        id: reader.attribute(None, "id"),
        from: reader.attribute(None, "sourceRef"),
        to: reader.attribute(None, "targetRef"),
        to_next: reader.attribute(Some(PROCFLOW_NS), "toNext").as_deref() == Some("true"),
        condition: None,
    };
    if let Some(condition) = reader.take_child(BPMN_NS, "conditionExpression") {
        reader.enter(condition);
        transition.condition = Some(match reader.attribute(Some(PROCFLOW_NS), "literal") {
            Some(literal) => match literal.trim() {
                "true" => Condition::Bool(true),
                "false" => Condition::Bool(false),
                other => {
                    return Err(reader.error(
                        format!("pf:literal must be true or false, got '{}'", other),
                        "PF-XML-005",
                    ))
                }
            },
            None => Condition::expr(reader.text()),
        });
        reader.exit();
    }
    reader.exit();
    Ok(transition)
}
