use super::binding::Binding;
use super::multi_instance::MultiInstance;
use super::parameter::{InputParameter, OutputParameter};
use super::scope::{Scope, Timer, Variable};
use super::transition::{Condition, Transition};
use crate::core::workflow::data::DataType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of node, which also selects the activity type that executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityKind {
    StartEvent,
    EndEvent,
    /// Pass-through placeholder that just continues.
    NoneTask,
    ScriptTask {
        script: String,
    },
    ExclusiveGateway,
    /// Container whose nested activities form the body.
    SubProcess,
    /// Collaborator-provided activity type registered under `service_type`.
    #[serde(rename_all = "camelCase")]
    ServiceTask {
        service_type: String,
    },
}

impl ActivityKind {
    /// Name under which the activity type is registered.
    pub fn type_name(&self) -> &str {
        match self {
            ActivityKind::StartEvent => "startEvent",
            ActivityKind::EndEvent => "endEvent",
            ActivityKind::NoneTask => "noneTask",
            ActivityKind::ScriptTask { .. } => "scriptTask",
            ActivityKind::ExclusiveGateway => "exclusiveGateway",
            ActivityKind::SubProcess => "subProcess",
            ActivityKind::ServiceTask { service_type } => service_type.as_str(),
        }
    }
}

/// One node of the workflow graph. Also a scope: it may nest a sub-graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_transition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<MultiInstance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing_transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, InputParameter>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub out: IndexMap<String, OutputParameter>,
    #[serde(flatten)]
    pub scope: Scope,
}

impl Activity {
    pub fn new(id: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            default_transition_id: None,
            multi_instance: None,
            outgoing_transitions: Vec::new(),
            inputs: IndexMap::new(),
            out: IndexMap::new(),
            scope: Scope::default(),
        }
    }

    pub fn none_task(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::NoneTask)
    }

    pub fn start_event(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::StartEvent)
    }

    pub fn end_event(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::EndEvent)
    }

    pub fn exclusive_gateway(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::ExclusiveGateway)
    }

    pub fn sub_process(id: impl Into<String>) -> Self {
        Self::new(id, ActivityKind::SubProcess)
    }

    pub fn script_task(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityKind::ScriptTask {
                script: script.into(),
            },
        )
    }

    pub fn service_task(id: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self::new(
            id,
            ActivityKind::ServiceTask {
                service_type: service_type.into(),
            },
        )
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn default_transition_id(mut self, transition_id: impl Into<String>) -> Self {
        self.default_transition_id = Some(transition_id.into());
        self
    }

    pub fn multi_instance(mut self, multi_instance: MultiInstance) -> Self {
        self.multi_instance = Some(multi_instance);
        self
    }

    /// Append an unconditional edge to `to_activity_id`.
    pub fn transition_to(self, to_activity_id: impl Into<String>) -> Self {
        self.transition(Transition::new().to(to_activity_id))
    }

    pub fn transition_with_condition_to(
        self,
        condition: Condition,
        to_activity_id: impl Into<String>,
    ) -> Self {
        self.transition(Transition::new().condition(condition).to(to_activity_id))
    }

    /// Append an edge to whichever activity follows this one in the parent scope.
    pub fn transition_to_next(self) -> Self {
        self.transition(Transition::new().to_next())
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.outgoing_transitions.push(transition);
        self
    }

    pub fn in_value(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.in_binding(key, Binding::value(value))
    }

    pub fn in_value_typed(
        self,
        key: impl Into<String>,
        value: impl Into<Value>,
        data_type: DataType,
    ) -> Self {
        self.in_binding(key, Binding::value(value).data_type(data_type))
    }

    pub fn in_expression(self, key: impl Into<String>, expression: impl Into<String>) -> Self {
        self.in_binding(key, Binding::expression(expression))
    }

    /// Set or replace the single binding of input `key`.
    pub fn in_binding(mut self, key: impl Into<String>, binding: Binding) -> Self {
        self.inputs
            .insert(key.into(), InputParameter::single(binding));
        self
    }

    /// Append `binding` to the binding list of input `key`.
    pub fn in_list_binding(mut self, key: impl Into<String>, binding: Binding) -> Self {
        let key = key.into();
        match self.inputs.get_mut(&key) {
            Some(parameter) => parameter.add_binding(binding),
            None => {
                self.inputs
                    .insert(key, InputParameter::Multiple(vec![binding]));
            }
        }
        self
    }

    pub fn out(mut self, key: impl Into<String>, variable_id: impl Into<String>) -> Self {
        self.out
            .insert(key.into(), OutputParameter::new(variable_id));
        self
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.scope.activities.push(activity);
        self
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.scope.variables.push(variable);
        self
    }

    pub fn timer(mut self, timer: Timer) -> Self {
        self.scope.timers.push(timer);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope.properties.insert(key.into(), value.into());
        self
    }

    /// Whether this activity nests its own sub-graph.
    pub fn is_container(&self) -> bool {
        self.scope.has_activities()
    }

    pub fn find_outgoing(&self, transition_id: &str) -> Option<&Transition> {
        self.outgoing_transitions
            .iter()
            .find(|transition| transition.id.as_deref() == Some(transition_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_appends_in_order() {
        let activity = Activity::none_task("a")
            .transition_with_condition_to(Condition::expr("amount > 100"), "big")
            .transition_to("small")
            .transition_to_next();
        assert_eq!(activity.outgoing_transitions.len(), 3);
        assert_eq!(activity.outgoing_transitions[0].to.as_deref(), Some("big"));
        assert!(activity.outgoing_transitions[2].to_next);
    }

    #[test]
    fn in_binding_replaces_and_list_binding_appends() {
        let activity = Activity::none_task("a")
            .in_value("amount", 1)
            .in_value("amount", 42)
            .in_value("items", "first")
            .in_list_binding("items", Binding::expression("second"));
        assert_eq!(
            activity.inputs["amount"],
            InputParameter::single(Binding::value(42))
        );
        assert_eq!(activity.inputs["items"].bindings().len(), 2);
        assert!(activity.inputs["items"].is_multiple());
    }

    #[test]
    fn json_carries_type_tag_and_nested_scope() {
        let activity = Activity::sub_process("sub")
            .activity(Activity::script_task("inner", "1 + 1"))
            .out("result", "total");
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["type"], json!("subProcess"));
        assert_eq!(value["activities"][0]["type"], json!("scriptTask"));
        assert_eq!(value["activities"][0]["script"], json!("1 + 1"));
        assert_eq!(value["out"]["result"]["variableId"], json!("total"));
        let back: Activity = serde_json::from_value(value).unwrap();
        assert_eq!(back, activity);
    }

    #[test]
    fn service_task_type_name_comes_from_definition() {
        let activity = Activity::service_task("mail", "emailTask");
        assert_eq!(activity.kind.type_name(), "emailTask");
    }
}
