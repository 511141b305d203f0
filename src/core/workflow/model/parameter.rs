#![allow(clippy::result_large_err)]

use super::binding::Binding;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Named input slot of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputParameter {
    #[serde(rename = "binding")]
    Single(Binding),
    /// Ordered bindings, resolved in declaration order into a list.
    #[serde(rename = "bindings")]
    Multiple(Vec<Binding>),
}

impl InputParameter {
    pub fn single(binding: Binding) -> Self {
        InputParameter::Single(binding)
    }

    /// Replace the binding of a single-binding parameter.
    pub fn set_binding(&mut self, binding: Binding) -> Result<(), AppError> {
        match self {
            InputParameter::Single(current) => {
                *current = binding;
                Ok(())
            }
            InputParameter::Multiple(_) => Err(AppError::new(
                ErrorCategory::DefinitionError,
                "cannot set a single binding on a parameter that already holds a binding list",
            )
            .with_code("PF-DEF-007")),
        }
    }

    /// Append a binding, switching a single-binding parameter into list mode.
    pub fn add_binding(&mut self, binding: Binding) {
        match self {
            InputParameter::Single(current) => {
                *self = InputParameter::Multiple(vec![current.clone(), binding]);
            }
            InputParameter::Multiple(bindings) => bindings.push(binding),
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        match self {
            InputParameter::Single(binding) => std::slice::from_ref(binding),
            InputParameter::Multiple(bindings) => bindings,
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, InputParameter::Multiple(_))
    }
}

/// Output slot: the variable that receives the value produced under this key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputParameter {
    pub variable_id: String,
}

impl OutputParameter {
    pub fn new(variable_id: impl Into<String>) -> Self {
        Self {
            variable_id: variable_id.into(),
        }
    }
}
