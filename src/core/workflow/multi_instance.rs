#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, CONTEXT_ACTIVITY_ID};
use crate::core::types::ErrorCategory;
use crate::core::workflow::data::TypedValue;
use crate::core::workflow::expression::{ExpressionService, ResolvedInput};
use crate::core::workflow::instance::ScopeInstance;
use crate::core::workflow::model::CompletionCondition;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const NR_OF_INSTANCES: &str = "nrOfInstances";
pub const NR_OF_COMPLETED_INSTANCES: &str = "nrOfCompletedInstances";
pub const NR_OF_ACTIVE_INSTANCES: &str = "nrOfActiveInstances";

/// Lifecycle of a multi-instance activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiInstanceState {
    Pending,
    Spawning,
    Running,
    Completed,
}

/// Observable fact recorded while a workflow instance runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InstanceEvent {
    #[serde(rename_all = "camelCase")]
    MultiInstanceStarted { activity_id: String, instances: usize },
    #[serde(rename_all = "camelCase")]
    MultiInstanceChildCompleted { activity_id: String, index: usize },
    #[serde(rename_all = "camelCase")]
    MultiInstanceChildFailed {
        activity_id: String,
        index: usize,
        code: String,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    MultiInstanceChildCancelled { activity_id: String, index: usize },
    #[serde(rename_all = "camelCase")]
    MultiInstanceCompleted {
        activity_id: String,
        completed: usize,
        cancelled: usize,
    },
}

/// Split a resolved collection input into its elements. A binding list is
/// the collection itself; a single binding must produce an array.
pub fn collection_elements(resolved: ResolvedInput) -> Result<Vec<Value>, AppError> {
    match resolved {
        ResolvedInput::Multiple(values) => Ok(values.into_iter().map(|v| v.value).collect()),
        ResolvedInput::Single(TypedValue {
            value: Value::Array(items),
            ..
        }) => Ok(items),
        ResolvedInput::Single(TypedValue { value: Value::Null, .. }) => Ok(Vec::new()),
        ResolvedInput::Single(other) => Err(AppError::new(
            ErrorCategory::EvaluationError,
            format!(
                "multi-instance collection must be a list, got {}",
                other.data_type
            ),
        )
        .with_code("PF-EXEC-006")),
    }
}

/// Fan-out/fan-in bookkeeping for one multi-instance activity.
#[derive(Debug)]
pub struct MultiInstanceTracker {
    activity_id: String,
    completion: CompletionCondition,
    state: MultiInstanceState,
    total: usize,
    spawned: usize,
    completed: usize,
    active: usize,
    cancelled: usize,
    events: Vec<InstanceEvent>,
}

impl MultiInstanceTracker {
    pub fn new(activity_id: impl Into<String>, completion: CompletionCondition) -> Self {
        Self {
            activity_id: activity_id.into(),
            completion,
            state: MultiInstanceState::Pending,
            total: 0,
            spawned: 0,
            completed: 0,
            active: 0,
            cancelled: 0,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> MultiInstanceState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn events(&self) -> &[InstanceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<InstanceEvent> {
        self.events
    }

    fn transition_error(&self, action: &str) -> AppError {
        AppError::new(
            ErrorCategory::InternalError,
            format!(
                "multi-instance {} cannot {} while {:?}",
                self.activity_id, action, self.state
            ),
        )
        .with_code("PF-EXEC-008")
        .with_detail(CONTEXT_ACTIVITY_ID, self.activity_id.clone())
    }

    /// Leave `Pending` with `total` children to run. An empty collection
    /// completes immediately.
    pub fn start(&mut self, total: usize) -> Result<(), AppError> {
        if self.state != MultiInstanceState::Pending {
            return Err(self.transition_error("start"));
        }
        self.total = total;
        self.events.push(InstanceEvent::MultiInstanceStarted {
            activity_id: self.activity_id.clone(),
            instances: total,
        });
        if total == 0 {
            self.finish();
        } else {
            self.state = MultiInstanceState::Spawning;
        }
        Ok(())
    }

    pub fn child_spawned(&mut self) -> Result<usize, AppError> {
        match self.state {
            MultiInstanceState::Spawning | MultiInstanceState::Running
                if self.spawned < self.total =>
            {
                let index = self.spawned;
                self.spawned += 1;
                self.active += 1;
                Ok(index)
            }
            _ => Err(self.transition_error("spawn a child")),
        }
    }

    /// Every child that will run concurrently has been spawned.
    pub fn mark_running(&mut self) {
        if self.state == MultiInstanceState::Spawning {
            self.state = MultiInstanceState::Running;
        }
    }

    /// Record a finished child and report whether the completion condition holds.
    pub fn child_completed(
        &mut self,
        index: usize,
        expressions: &ExpressionService,
        instance: &Arc<ScopeInstance>,
    ) -> Result<bool, AppError> {
        self.active = self.active.saturating_sub(1);
        self.completed += 1;
        self.events.push(InstanceEvent::MultiInstanceChildCompleted {
            activity_id: self.activity_id.clone(),
            index,
        });
        let satisfied = self.is_satisfied(expressions, instance)?;
        debug!(
            activity_id = %self.activity_id,
            completed = self.completed,
            total = self.total,
            satisfied,
            "multi-instance child completed"
        );
        Ok(satisfied)
    }

    pub fn child_failed(&mut self, index: usize, error: &AppError) {
        self.active = self.active.saturating_sub(1);
        warn!(
            activity_id = %self.activity_id,
            index,
            code = %error.code,
            "multi-instance child failed: {}",
            error.message
        );
        self.events.push(InstanceEvent::MultiInstanceChildFailed {
            activity_id: self.activity_id.clone(),
            index,
            code: error.code.clone(),
            message: error.message.clone(),
        });
    }

    pub fn child_cancelled(&mut self, index: usize) {
        self.active = self.active.saturating_sub(1);
        self.cancelled += 1;
        self.events.push(InstanceEvent::MultiInstanceChildCancelled {
            activity_id: self.activity_id.clone(),
            index,
        });
    }

    pub fn finish(&mut self) {
        if self.state == MultiInstanceState::Completed {
            return;
        }
        self.state = MultiInstanceState::Completed;
        self.events.push(InstanceEvent::MultiInstanceCompleted {
            activity_id: self.activity_id.clone(),
            completed: self.completed,
            cancelled: self.cancelled,
        });
    }

    /// Counter variables visible to a completion expression.
    pub fn counters(&self) -> IndexMap<String, TypedValue> {
        let mut counters = IndexMap::new();
        counters.insert(
            NR_OF_INSTANCES.to_string(),
            TypedValue::inferred(json!(self.total)),
        );
        counters.insert(
            NR_OF_COMPLETED_INSTANCES.to_string(),
            TypedValue::inferred(json!(self.completed)),
        );
        counters.insert(
            NR_OF_ACTIVE_INSTANCES.to_string(),
            TypedValue::inferred(json!(self.active)),
        );
        counters
    }

    fn is_satisfied(
        &self,
        expressions: &ExpressionService,
        instance: &Arc<ScopeInstance>,
    ) -> Result<bool, AppError> {
        if self.completed >= self.total {
            return Ok(true);
        }
        match &self.completion {
            CompletionCondition::All => Ok(false),
            CompletionCondition::Any => Ok(self.completed >= 1),
            CompletionCondition::Expression(text) => {
                let overlay = instance.overlay(self.counters());
                let compiled = expressions.compile_text(text)?;
                match expressions.execute(&compiled, &overlay)? {
                    Value::Bool(flag) => Ok(flag),
                    other => Err(AppError::new(
                        ErrorCategory::EvaluationError,
                        format!("completion condition '{}' returned {}", text, other),
                    )
                    .with_code("PF-EXPR-003")
                    .with_detail(CONTEXT_ACTIVITY_ID, self.activity_id.clone())),
                }
            }
        }
    }
}
