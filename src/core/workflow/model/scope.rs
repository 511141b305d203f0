use super::activity::Activity;
use super::transition::Transition;
use crate::core::workflow::data::DataType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared variable of a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl Variable {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data_type: None,
            default_value: None,
        }
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Timer declaration. Firing timers is left to the job scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: String,
    /// Relative delay in humantime notation, e.g. `5m` or `1h 30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
}

impl Timer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            duration: None,
            due_date_expression: None,
            repeat: None,
        }
    }

    pub fn duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }
}

/// Container of activities, transitions, variables, timers and properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<Activity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<Timer>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,
}

impl Scope {
    pub fn activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn timer(mut self, timer: Timer) -> Self {
        self.timers.push(timer);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn find_activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|activity| activity.id == id)
    }

    pub fn find_variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.id == id)
    }

    pub fn has_activities(&self) -> bool {
        !self.activities.is_empty()
    }

    /// Move scope-level transitions whose `from` names an activity of this
    /// scope onto that activity's outgoing transitions. Outgoing transitions
    /// never keep a `from`.
    pub(crate) fn fold_scope_transitions(&mut self) {
        for activity in self.activities.iter_mut() {
            for transition in activity.outgoing_transitions.iter_mut() {
                transition.from = None;
            }
        }
        let transitions = std::mem::take(&mut self.transitions);
        for mut transition in transitions {
            let owner = transition
                .from
                .as_deref()
                .and_then(|from| self.activities.iter().position(|a| a.id == from));
            match owner {
                Some(index) => {
                    transition.from = None;
                    self.activities[index].outgoing_transitions.push(transition);
                }
                None => self.transitions.push(transition),
            }
        }
    }
}

/// Location of a scope: the activity ids leading to it from the workflow root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopePath(Vec<String>);

impl ScopePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, activity_id: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(activity_id.to_string());
        Self(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Display form of the activity `activity_id` inside this scope.
    pub fn activity(&self, activity_id: &str) -> String {
        self.child(activity_id).to_string()
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
