use super::binding::Binding;
use super::parameter::InputParameter;
use super::scope::Variable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether multi-instance children run side by side or one after another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiInstanceMode {
    #[default]
    Parallel,
    Sequential,
}

impl fmt::Display for MultiInstanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiInstanceMode::Parallel => write!(f, "parallel"),
            MultiInstanceMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Join condition deciding when a multi-instance node is complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionCondition {
    #[default]
    All,
    Any,
    /// Boolean expression over `nrOfInstances`, `nrOfCompletedInstances`
    /// and `nrOfActiveInstances`.
    Expression(String),
}

/// Fan-out configuration: one child per element of the resolved collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiInstance {
    pub collection: InputParameter,
    pub element_variable: Variable,
    #[serde(default)]
    pub mode: MultiInstanceMode,
    #[serde(default)]
    pub completion: CompletionCondition,
}

impl MultiInstance {
    pub fn new(element_variable: Variable, collection: Binding) -> Self {
        Self {
            collection: InputParameter::single(collection),
            element_variable,
            mode: MultiInstanceMode::Parallel,
            completion: CompletionCondition::All,
        }
    }

    /// Build the collection from several bindings, one element per binding.
    pub fn from_bindings(element_variable: Variable, bindings: Vec<Binding>) -> Self {
        Self {
            collection: InputParameter::Multiple(bindings),
            element_variable,
            mode: MultiInstanceMode::Parallel,
            completion: CompletionCondition::All,
        }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = MultiInstanceMode::Sequential;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.mode = MultiInstanceMode::Parallel;
        self
    }

    pub fn completion(mut self, completion: CompletionCondition) -> Self {
        self.completion = completion;
        self
    }
}
