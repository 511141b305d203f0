#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// Declared or inferred type of a variable, binding or parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Text,
    Number,
    Boolean,
    /// RFC 3339 timestamp stored as a string.
    Date,
    /// Any JSON value, no coercion applied.
    Json,
    List(Box<DataType>),
}

impl DataType {
    /// Natural type of a JSON value.
    pub fn infer(value: &Value) -> DataType {
        match value {
            Value::String(_) => DataType::Text,
            Value::Number(_) => DataType::Number,
            Value::Bool(_) => DataType::Boolean,
            Value::Array(items) => {
                let mut element = items.iter().map(DataType::infer);
                match element.next() {
                    Some(first) if element.all(|other| other == first) => {
                        DataType::List(Box::new(first))
                    }
                    _ => DataType::List(Box::new(DataType::Json)),
                }
            }
            Value::Null | Value::Object(_) => DataType::Json,
        }
    }

    /// Convert `value` so it conforms to this type.
    pub fn coerce(&self, value: Value) -> Result<Value, AppError> {
        if value.is_null() {
            return Ok(value);
        }
        match (self, value) {
            (DataType::Json, value) => Ok(value),
            (DataType::Text, Value::String(s)) => Ok(Value::String(s)),
            (DataType::Text, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (DataType::Text, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (DataType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (DataType::Number, Value::String(s)) => parse_number(&s),
            (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (DataType::Boolean, Value::String(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(coercion_error(self, other)),
            },
            (DataType::Date, Value::String(s)) => {
                DateTime::parse_from_rfc3339(s.trim())
                    .map_err(|err| coercion_error(self, &format!("{} ({})", s, err)))?;
                Ok(Value::String(s))
            }
            (DataType::List(element), Value::Array(items)) => items
                .into_iter()
                .map(|item| element.coerce(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (_, other) => Err(coercion_error(self, &other.to_string())),
        }
    }

    /// Lowercase name used in the interchange formats.
    pub fn name(&self) -> String {
        match self {
            DataType::Text => "text".to_string(),
            DataType::Number => "number".to_string(),
            DataType::Boolean => "boolean".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Json => "json".to_string(),
            DataType::List(element) => format!("list<{}>", element.name()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for DataType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Some(inner) = trimmed
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Ok(DataType::List(Box::new(inner.parse()?)));
        }
        match trimmed {
            "text" => Ok(DataType::Text),
            "number" => Ok(DataType::Number),
            "boolean" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "json" => Ok(DataType::Json),
            other => Err(AppError::new(
                ErrorCategory::InterchangeError,
                format!("unknown data type '{}'", other),
            )
            .with_code("PF-XML-005")),
        }
    }
}

fn parse_number(text: &str) -> Result<Value, AppError> {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::Number(Number::from(i)));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| coercion_error(&DataType::Number, text))
}

fn coercion_error(data_type: &DataType, raw: &str) -> AppError {
    AppError::new(
        ErrorCategory::EvaluationError,
        format!("value {} cannot be interpreted as {}", raw, data_type),
    )
    .with_code("PF-EXPR-004")
}

/// A value paired with the type it is interpreted under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    pub value: Value,
    pub data_type: DataType,
}

impl TypedValue {
    pub fn new(value: Value, data_type: DataType) -> Self {
        Self { value, data_type }
    }

    /// Wrap a value under its inferred type.
    pub fn inferred(value: Value) -> Self {
        let data_type = DataType::infer(&value);
        Self { value, data_type }
    }

    /// Coerce `value` to `declared` when present, otherwise infer its type.
    pub fn resolve(value: Value, declared: Option<&DataType>) -> Result<Self, AppError> {
        match declared {
            Some(data_type) => Ok(Self::new(data_type.coerce(value)?, data_type.clone())),
            None => Ok(Self::inferred(value)),
        }
    }
}
