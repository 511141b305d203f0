use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::activity_type::{ActivityContext, ActivityOutput, ActivityType};
use crate::core::workflow::model::Activity;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Output key carrying the activity's primary value.
pub const RESULT_KEY: &str = "result";

/// Structural activity that does no work: events, gateways and the none task.
///
/// Every input is echoed as an output of the same name. `result` carries the
/// sole input's value, or an object of all inputs when there are several.
pub struct PassThroughActivity {
    name: &'static str,
}

impl PassThroughActivity {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn start_event() -> Self {
        Self::new("startEvent")
    }

    pub fn end_event() -> Self {
        Self::new("endEvent")
    }

    pub fn none_task() -> Self {
        Self::new("noneTask")
    }

    pub fn exclusive_gateway() -> Self {
        Self::new("exclusiveGateway")
    }
}

#[async_trait]
impl ActivityType for PassThroughActivity {
    fn name(&self) -> &str {
        self.name
    }

    fn validate(&self, activity: &Activity) -> Result<(), AppError> {
        if activity.kind.type_name() != self.name {
            return Err(AppError::new(
                ErrorCategory::DefinitionError,
                format!(
                    "activity {} of type {} cannot run as {}",
                    activity.id,
                    activity.kind.type_name(),
                    self.name
                ),
            )
            .with_code("PF-DEF-011"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        inputs: IndexMap<String, Value>,
        _ctx: ActivityContext,
    ) -> Result<ActivityOutput, AppError> {
        let result = match inputs.len() {
            0 => Value::Null,
            1 => inputs.values().next().cloned().unwrap_or(Value::Null),
            _ => Value::Object(
                inputs
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect::<Map<String, Value>>(),
            ),
        };
        let mut output = ActivityOutput { values: inputs };
        output.values.entry(RESULT_KEY.to_string()).or_insert(result);
        Ok(output)
    }
}
