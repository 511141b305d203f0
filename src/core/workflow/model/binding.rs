use crate::core::workflow::data::DataType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a binding takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingSource {
    /// Literal value used as-is.
    Value(Value),
    /// Expression evaluated against the scope instance variables.
    Expression(String),
}

/// Typed data source: a literal value or an expression, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    #[serde(flatten)]
    pub source: BindingSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
}

impl Binding {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            source: BindingSource::Value(value.into()),
            data_type: None,
        }
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            source: BindingSource::Expression(expression.into()),
            data_type: None,
        }
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn expression_text(&self) -> Option<&str> {
        match &self.source {
            BindingSource::Expression(text) => Some(text.as_str()),
            BindingSource::Value(_) => None,
        }
    }

    pub fn literal(&self) -> Option<&Value> {
        match &self.source {
            BindingSource::Value(value) => Some(value),
            BindingSource::Expression(_) => None,
        }
    }
}
