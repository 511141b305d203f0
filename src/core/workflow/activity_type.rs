#![allow(clippy::result_large_err)] // Activity types return AppError directly for structured diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::expression::ExpressionService;
use crate::core::workflow::instance::ScopeInstance;
use crate::core::workflow::model::Activity;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution context provided to each activity run.
#[derive(Clone)]
pub struct ActivityContext {
    pub execution_id: Uuid,
    pub activity: Arc<Activity>,
    pub instance: Arc<ScopeInstance>,
    pub expressions: Arc<ExpressionService>,
    /// How many times this activity has started in the current run, from 1.
    pub iteration: u64,
    pub cancellation: CancellationToken,
}

/// Values produced by an activity, keyed by output name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityOutput {
    pub values: IndexMap<String, Value>,
}

impl ActivityOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// Behaviour behind an activity kind. Business activity types (mail, HTTP,
/// approvals) are supplied by collaborators and registered by name.
#[async_trait]
pub trait ActivityType: Send + Sync + 'static {
    /// Name matched against [`crate::core::workflow::model::ActivityKind::type_name`].
    fn name(&self) -> &str;

    /// Check the definition ahead of execution.
    fn validate(&self, activity: &Activity) -> Result<(), AppError>;

    /// Run the activity with its resolved inputs.
    async fn execute(
        &self,
        inputs: IndexMap<String, Value>,
        ctx: ActivityContext,
    ) -> Result<ActivityOutput, AppError>;
}

/// Builder used to register activity types before execution.
#[derive(Default)]
pub struct ActivityTypeRegistryBuilder {
    types: HashMap<String, Arc<dyn ActivityType>>,
}

impl ActivityTypeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: ActivityType>(&mut self, activity_type: T) -> Result<&mut Self, AppError> {
        let name = activity_type.name().to_string();
        if self.types.contains_key(&name) {
            return Err(AppError::new(
                ErrorCategory::DefinitionError,
                format!("duplicate activity type registered: {}", name),
            )
            .with_code("PF-DEF-010"));
        }
        self.types.insert(name, Arc::new(activity_type));
        Ok(self)
    }

    pub fn build(self) -> ActivityTypeRegistry {
        ActivityTypeRegistry {
            inner: Arc::new(self.types),
        }
    }
}

/// Immutable registry available during workflow execution.
#[derive(Clone, Default)]
pub struct ActivityTypeRegistry {
    inner: Arc<HashMap<String, Arc<dyn ActivityType>>>,
}

impl ActivityTypeRegistry {
    pub fn builder() -> ActivityTypeRegistryBuilder {
        ActivityTypeRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityType>> {
        self.inner.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
