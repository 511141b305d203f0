#![allow(clippy::result_large_err)] // Engine returns AppError to preserve full diagnostic context.

use crate::core::error::{
    AppError, CONTEXT_ACTIVITY_ID, CONTEXT_PARAMETER_KEY, CONTEXT_SCOPE_PATH,
};
use crate::core::types::{ErrorCategory, ExecutionStatus};
use crate::core::workflow::activity_type::{ActivityContext, ActivityTypeRegistry};
use crate::core::workflow::data::TypedValue;
use crate::core::workflow::executable::{
    ExecutableActivity, ExecutableScope, ExecutableWorkflow, ResolvedTransition,
};
use crate::core::workflow::expression::{ExpressionService, ResolvedInput};
use crate::core::workflow::instance::ScopeInstance;
use crate::core::workflow::model::{Activity, MultiInstance, MultiInstanceMode, ScopePath};
use crate::core::workflow::multi_instance::{
    collection_elements, InstanceEvent, MultiInstanceState, MultiInstanceTracker,
};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Input key used to report multi-instance collection failures.
const COLLECTION_KEY: &str = "collection";
/// Zero-based position of a multi-instance child, visible to its activity.
pub const LOOP_COUNTER: &str = "loopCounter";

/// Resolved engine limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Ready activities of one scope run concurrently up to this many.
    pub parallel_limit: usize,
    pub max_time_seconds: u64,
    /// Starts allowed per activity in one run, guarding loops.
    pub max_activity_iterations: usize,
    pub max_workflow_iterations: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            max_time_seconds: 300,
            max_activity_iterations: 100,
            max_workflow_iterations: 10_000,
        }
    }
}

/// Optional overrides supplied by CLI flags.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOverrides {
    pub parallel_limit: Option<usize>,
    pub max_time_seconds: Option<u64>,
}

impl EngineSettings {
    pub fn with_overrides(mut self, overrides: &ExecutionOverrides) -> Self {
        if let Some(parallel) = overrides.parallel_limit {
            self.parallel_limit = parallel.max(1);
        }
        if let Some(max_time) = overrides.max_time_seconds {
            self.max_time_seconds = max_time;
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityRunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Record of one activity start within a run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRunRecord {
    pub scope: String,
    pub activity_id: String,
    pub activity_type: String,
    pub status: ActivityRunStatus,
    pub iteration: u64,
    pub outputs: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Summary of a workflow execution run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub fingerprint: String,
    pub status: ExecutionStatus,
    pub total_iterations: usize,
    /// Root scope variables after the run.
    pub variables: IndexMap<String, Value>,
    pub activity_runs: Vec<ActivityRunRecord>,
    pub events: Vec<InstanceEvent>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionSummary {
    pub fn runs_of(&self, activity_id: &str) -> impl Iterator<Item = &ActivityRunRecord> {
        let activity_id = activity_id.to_string();
        self.activity_runs
            .iter()
            .filter(move |record| record.activity_id == activity_id)
    }
}

/// Drives executable workflows with a fixed set of activity types.
pub struct WorkflowEngine {
    registry: ActivityTypeRegistry,
    expressions: Arc<ExpressionService>,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        registry: ActivityTypeRegistry,
        expressions: Arc<ExpressionService>,
        mut settings: EngineSettings,
    ) -> Self {
        settings.parallel_limit = settings.parallel_limit.max(1);
        Self {
            registry,
            expressions,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ActivityTypeRegistry {
        &self.registry
    }

    /// Every non-container activity needs a registered type that accepts it.
    pub fn validate(&self, workflow: &ExecutableWorkflow) -> Result<(), AppError> {
        for scope in workflow.scopes() {
            for activity in &scope.activities {
                if activity.is_container() {
                    continue;
                }
                let type_name = activity.activity.kind.type_name();
                let activity_type = self.registry.get(type_name).ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::DefinitionError,
                        format!("activity type '{}' is not registered", type_name),
                    )
                    .with_code("PF-DEF-009")
                    .with_detail(CONTEXT_SCOPE_PATH, scope.path.to_string())
                    .with_detail(CONTEXT_ACTIVITY_ID, activity.id())
                    .with_suggestion(format!(
                        "register an activity type named '{}' or use one of: {}",
                        type_name,
                        self.registry.names().join(", ")
                    ))
                })?;
                activity_type.validate(&activity.activity).map_err(|err| {
                    err.with_detail(CONTEXT_SCOPE_PATH, scope.path.to_string())
                        .with_detail(CONTEXT_ACTIVITY_ID, activity.id())
                })?;
            }
        }
        Ok(())
    }

    /// Run `workflow` with initial root variables.
    pub async fn run(
        &self,
        workflow: &ExecutableWorkflow,
        variables: IndexMap<String, Value>,
    ) -> Result<ExecutionSummary, AppError> {
        self.run_with_cancellation(workflow, variables, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancellation(
        &self,
        workflow: &ExecutableWorkflow,
        variables: IndexMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ExecutionSummary, AppError> {
        self.validate(workflow)?;
        let root_scope = Arc::clone(workflow.root());
        let root = ScopeInstance::root(&root_scope.variables)?;
        for (name, value) in variables {
            root.write_output(&name, value)
                .map_err(|err| err.with_detail(CONTEXT_PARAMETER_KEY, name.clone()))?;
        }

        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let runtime = WorkflowRuntime {
            engine: self,
            workflow,
            execution_id,
            start_time: Instant::now(),
            max_time: Duration::from_secs(self.settings.max_time_seconds),
            ledger: Mutex::new(RunLedger::default()),
        };
        let span = info_span!(
            "workflow.run",
            execution_id = %execution_id,
            fingerprint = workflow.fingerprint()
        );
        info!(parent: &span, "workflow run started");

        let body = runtime.run_scope(root_scope, Arc::clone(&root), cancellation.clone());
        let outcome = match tokio::time::timeout(runtime.max_time, body.instrument(span.clone()))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                cancellation.cancel();
                Err(timeout_error())
            }
        };
        if let Err(err) = outcome {
            warn!(parent: &span, code = %err.code, "workflow run failed: {}", err.message);
            return Err(err);
        }

        let ledger = runtime.ledger.into_inner();
        let summary = ExecutionSummary {
            execution_id,
            fingerprint: workflow.fingerprint().to_string(),
            status: ExecutionStatus::Completed,
            total_iterations: ledger.total_iterations,
            variables: root.visible_variables(),
            activity_runs: ledger.records,
            events: ledger.events,
            started_at,
            completed_at: Utc::now(),
        };
        info!(
            parent: &span,
            iterations = summary.total_iterations,
            "workflow run completed"
        );
        Ok(summary)
    }
}

#[derive(Default)]
struct RunLedger {
    total_iterations: usize,
    activity_iterations: HashMap<String, usize>,
    records: Vec<ActivityRunRecord>,
    events: Vec<InstanceEvent>,
}

struct WorkflowRuntime<'a> {
    engine: &'a WorkflowEngine,
    workflow: &'a ExecutableWorkflow,
    execution_id: Uuid,
    start_time: Instant,
    max_time: Duration,
    ledger: Mutex<RunLedger>,
}

fn timeout_error() -> AppError {
    AppError::new(
        ErrorCategory::TimeoutError,
        "workflow exceeded max_time_seconds",
    )
    .with_code("PF-EXEC-001")
}

fn cancelled_error(activity_id: &str) -> AppError {
    AppError::new(
        ErrorCategory::CancelledError,
        format!("activity {} was cancelled", activity_id),
    )
    .with_code("PF-EXEC-004")
    .with_detail(CONTEXT_ACTIVITY_ID, activity_id)
}

/// Fan-in state of one multi-instance activity.
struct FanIn {
    tracker: MultiInstanceTracker,
    children: CancellationToken,
    satisfied: bool,
    failure: Option<AppError>,
}

impl FanIn {
    fn settled(&self) -> bool {
        self.satisfied || self.failure.is_some()
    }

    fn fail(&mut self, error: AppError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.children.cancel();
    }

    fn settle(
        &mut self,
        index: usize,
        result: Result<IndexMap<String, Value>, AppError>,
        expressions: &ExpressionService,
        instance: &Arc<ScopeInstance>,
    ) {
        match result {
            Ok(_) => match self.tracker.child_completed(index, expressions, instance) {
                Ok(true) if !self.satisfied => {
                    self.satisfied = true;
                    self.children.cancel();
                }
                Ok(_) => {}
                Err(err) => self.fail(err),
            },
            Err(err) if err.is_category(ErrorCategory::CancelledError) => {
                self.tracker.child_cancelled(index)
            }
            Err(err) => {
                self.tracker.child_failed(index, &err);
                self.fail(err);
            }
        }
    }
}

impl<'a> WorkflowRuntime<'a> {
    fn check_guards(&self, token: &CancellationToken) -> Result<(), AppError> {
        if token.is_cancelled() {
            return Err(AppError::new(
                ErrorCategory::CancelledError,
                "workflow run was cancelled",
            )
            .with_code("PF-EXEC-004"));
        }
        if self.start_time.elapsed() >= self.max_time {
            return Err(timeout_error());
        }
        Ok(())
    }

    async fn next_iteration(&self, path: &ScopePath, activity_id: &str) -> Result<u64, AppError> {
        let settings = &self.engine.settings;
        let mut ledger = self.ledger.lock().await;
        if ledger.total_iterations >= settings.max_workflow_iterations {
            return Err(AppError::new(
                ErrorCategory::IterationError,
                "workflow exceeded max_workflow_iterations",
            )
            .with_code("PF-EXEC-002"));
        }
        ledger.total_iterations += 1;
        let entry = ledger
            .activity_iterations
            .entry(path.activity(activity_id))
            .or_insert(0);
        if *entry >= settings.max_activity_iterations {
            return Err(AppError::new(
                ErrorCategory::IterationError,
                format!("activity {} reached iteration cap", activity_id),
            )
            .with_code("PF-EXEC-003")
            .with_detail(CONTEXT_SCOPE_PATH, path.to_string())
            .with_detail(CONTEXT_ACTIVITY_ID, activity_id));
        }
        *entry += 1;
        Ok(*entry as u64)
    }

    /// Drive one scope from its start activities until no path continues.
    fn run_scope<'s>(
        &'s self,
        scope: Arc<ExecutableScope>,
        instance: Arc<ScopeInstance>,
        token: CancellationToken,
    ) -> BoxFuture<'s, Result<(), AppError>> {
        async move {
            let mut ready_queue: VecDeque<usize> = scope
                .start_activities()
                .filter_map(|activity| scope.position(activity.id()))
                .collect();
            debug!(scope = %scope.path, starts = ready_queue.len(), "scope started");

            while !ready_queue.is_empty() {
                self.check_guards(&token)?;

                let mut tick = Vec::new();
                while tick.len() < self.engine.settings.parallel_limit {
                    let Some(position) = ready_queue.pop_front() else {
                        break;
                    };
                    let iteration = self
                        .next_iteration(&scope.path, scope.activities[position].id())
                        .await?;
                    tick.push((position, iteration));
                }

                let runs = tick.iter().map(|&(position, iteration)| {
                    self.run_activity(&scope, position, &instance, iteration, &token)
                });
                let outcomes = join_all(runs).await;
                for outcome in outcomes {
                    outcome?;
                }

                // Paths joining on an activity that is already waiting merge
                // into that pending start.
                for &(position, _) in &tick {
                    let activity = &scope.activities[position];
                    match self.select_transition(activity, &instance)? {
                        Some(transition) => {
                            if let Some(target) = scope.position(&transition.target) {
                                if !ready_queue.contains(&target) {
                                    ready_queue.push_back(target);
                                }
                            }
                        }
                        None => debug!(
                            scope = %scope.path,
                            activity_id = activity.id(),
                            "no transition applies; path ends"
                        ),
                    }
                }
            }
            debug!(scope = %scope.path, "scope completed");
            Ok(())
        }
        .boxed()
    }

    async fn run_activity(
        &self,
        scope: &ExecutableScope,
        position: usize,
        instance: &Arc<ScopeInstance>,
        iteration: u64,
        token: &CancellationToken,
    ) -> Result<(), AppError> {
        let activity = &scope.activities[position];
        let type_name = activity.activity.kind.type_name().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            scope = %scope.path,
            activity_id = activity.id(),
            activity_type = %type_name,
            iteration,
            "activity started"
        );

        let result = match &activity.activity.multi_instance {
            Some(multi_instance) => {
                self.run_multi_instance(scope, activity, multi_instance, instance, iteration, token)
                    .await
            }
            None => {
                self.run_single(scope, activity, instance, iteration, token)
                    .await
            }
        };

        let (status, outputs, error_code) = match &result {
            Ok(outputs) => (ActivityRunStatus::Completed, outputs.clone(), None),
            Err(err) if err.is_category(ErrorCategory::CancelledError) => {
                (ActivityRunStatus::Cancelled, IndexMap::new(), Some(err.code.clone()))
            }
            Err(err) => (ActivityRunStatus::Failed, IndexMap::new(), Some(err.code.clone())),
        };
        let duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            scope = %scope.path,
            activity_id = activity.id(),
            status = ?status,
            duration_ms,
            "activity finished"
        );
        self.ledger.lock().await.records.push(ActivityRunRecord {
            scope: scope.path.to_string(),
            activity_id: activity.id().to_string(),
            activity_type: type_name,
            status,
            iteration,
            outputs,
            error_code,
            started_at,
            duration_ms,
        });

        result.map(|_| ()).map_err(|err| {
            err.with_detail(CONTEXT_SCOPE_PATH, scope.path.to_string())
                .with_detail(CONTEXT_ACTIVITY_ID, activity.id())
        })
    }

    /// Resolve inputs, run the activity (or its nested scope) and write its
    /// outputs into `instance`.
    async fn run_single(
        &self,
        scope: &ExecutableScope,
        activity: &ExecutableActivity,
        instance: &Arc<ScopeInstance>,
        iteration: u64,
        token: &CancellationToken,
    ) -> Result<IndexMap<String, Value>, AppError> {
        let definition = &activity.activity;
        if token.is_cancelled() {
            return Err(cancelled_error(&definition.id));
        }
        let inputs = self.resolve_inputs(definition, instance)?;

        let outputs = if activity.is_container() {
            self.run_container(scope, definition, inputs, instance, token)
                .await?
        } else {
            let type_name = definition.kind.type_name();
            let activity_type = self.engine.registry.get(type_name).ok_or_else(|| {
                AppError::new(
                    ErrorCategory::DefinitionError,
                    format!("activity type '{}' is not registered", type_name),
                )
                .with_code("PF-DEF-009")
            })?;
            let ctx = ActivityContext {
                execution_id: self.execution_id,
                activity: Arc::clone(definition),
                instance: Arc::clone(instance),
                expressions: Arc::clone(&self.engine.expressions),
                iteration,
                cancellation: token.clone(),
            };
            let values = inputs
                .into_iter()
                .map(|(key, value)| (key, value.value))
                .collect();
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled_error(&definition.id)),
                output = activity_type.execute(values, ctx) => output?.values,
            }
        };

        self.write_outputs(definition, &outputs, instance)?;
        Ok(outputs)
    }

    async fn run_container(
        &self,
        scope: &ExecutableScope,
        definition: &Activity,
        inputs: IndexMap<String, TypedValue>,
        instance: &Arc<ScopeInstance>,
        token: &CancellationToken,
    ) -> Result<IndexMap<String, Value>, AppError> {
        let path = scope.path.child(&definition.id);
        let nested = self.workflow.scope(&path).cloned().ok_or_else(|| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("no executable scope at {}", path),
            )
            .with_code("PF-EXEC-008")
        })?;
        let child = instance.child(&definition.id, &nested.variables)?;
        for (key, value) in inputs {
            child.set_local(key, value);
        }
        self.run_scope(nested, Arc::clone(&child), token.clone())
            .await?;

        let mut outputs = IndexMap::new();
        for key in definition.out.keys() {
            if let Some(value) = child.get(key) {
                outputs.insert(key.clone(), value.value);
            }
        }
        Ok(outputs)
    }

    async fn run_multi_instance(
        &self,
        scope: &ExecutableScope,
        activity: &ExecutableActivity,
        multi_instance: &MultiInstance,
        instance: &Arc<ScopeInstance>,
        iteration: u64,
        token: &CancellationToken,
    ) -> Result<IndexMap<String, Value>, AppError> {
        let definition = &activity.activity;
        let expressions = self.engine.expressions.as_ref();
        let collection =
            expressions.resolve_input(COLLECTION_KEY, &multi_instance.collection, instance)?;
        let elements = collection_elements(collection)?;

        let mut fan_in = FanIn {
            tracker: MultiInstanceTracker::new(
                definition.id.clone(),
                multi_instance.completion.clone(),
            ),
            children: token.child_token(),
            satisfied: false,
            failure: None,
        };
        fan_in.tracker.start(elements.len())?;
        info!(
            activity_id = %definition.id,
            instances = elements.len(),
            mode = %multi_instance.mode,
            "multi-instance started"
        );

        if fan_in.tracker.state() != MultiInstanceState::Completed {
            match multi_instance.mode {
                MultiInstanceMode::Parallel => {
                    let mut running = FuturesUnordered::new();
                    for element in elements {
                        let index = fan_in.tracker.child_spawned()?;
                        let child = element_instance(multi_instance, instance, index, element)?;
                        let children = fan_in.children.clone();
                        running.push(async move {
                            let result = self
                                .run_single(scope, activity, &child, iteration, &children)
                                .await;
                            (index, result)
                        });
                    }
                    fan_in.tracker.mark_running();
                    // Drain every child, including those cancelled after the
                    // completion condition held.
                    while let Some((index, result)) = running.next().await {
                        fan_in.settle(index, result, expressions, instance);
                    }
                }
                MultiInstanceMode::Sequential => {
                    for element in elements {
                        if fan_in.settled() {
                            break;
                        }
                        let index = fan_in.tracker.child_spawned()?;
                        fan_in.tracker.mark_running();
                        let child = element_instance(multi_instance, instance, index, element)?;
                        let result = self
                            .run_single(scope, activity, &child, iteration, &fan_in.children)
                            .await;
                        fan_in.settle(index, result, expressions, instance);
                    }
                }
            }
            fan_in.tracker.finish();
        }

        let FanIn {
            tracker, failure, ..
        } = fan_in;
        info!(
            activity_id = %definition.id,
            completed = tracker.completed(),
            "multi-instance completed"
        );
        self.ledger
            .lock()
            .await
            .events
            .extend(tracker.into_events());

        if let Some(err) = failure {
            return Err(AppError::new(
                err.category,
                format!(
                    "multi-instance child of {} failed: {}",
                    definition.id, err.message
                ),
            )
            .with_code("PF-EXEC-007")
            .with_detail("child_code", err.code.clone()));
        }
        if token.is_cancelled() {
            return Err(cancelled_error(&definition.id));
        }
        Ok(IndexMap::new())
    }

    /// Resolve every input parameter. An input whose expression fails falls
    /// back to the default of a same-named variable of the activity's scope.
    fn resolve_inputs(
        &self,
        definition: &Activity,
        instance: &ScopeInstance,
    ) -> Result<IndexMap<String, TypedValue>, AppError> {
        let mut resolved = IndexMap::new();
        for (key, parameter) in &definition.inputs {
            let value = match self
                .engine
                .expressions
                .resolve_input(key, parameter, instance)
            {
                Ok(ResolvedInput::Single(value)) => value,
                Ok(multiple) => TypedValue::inferred(multiple.into_value()),
                Err(err) if err.is_category(ErrorCategory::EvaluationError) => {
                    let fallback = definition
                        .scope
                        .find_variable(key)
                        .and_then(|variable| variable.default_value.as_ref().map(|d| (variable, d)));
                    let Some((variable, default)) = fallback else {
                        return Err(err);
                    };
                    warn!(
                        activity_id = %definition.id,
                        parameter = %key,
                        "input evaluation failed, using variable default: {}",
                        err.message
                    );
                    TypedValue::resolve(default.clone(), variable.data_type.as_ref())?
                }
                Err(err) => return Err(err),
            };
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }

    fn write_outputs(
        &self,
        definition: &Activity,
        outputs: &IndexMap<String, Value>,
        instance: &ScopeInstance,
    ) -> Result<(), AppError> {
        for (key, parameter) in &definition.out {
            let Some(value) = outputs.get(key) else {
                debug!(activity_id = %definition.id, output = %key, "activity produced no value");
                continue;
            };
            let target = instance
                .write_output(&parameter.variable_id, value.clone())
                .map_err(|err| err.with_detail(CONTEXT_PARAMETER_KEY, key.clone()))?;
            debug!(
                activity_id = %definition.id,
                variable = %parameter.variable_id,
                scope = %target,
                "output written"
            );
        }
        Ok(())
    }

    /// First non-default transition whose condition holds, else the default.
    fn select_transition<'e>(
        &self,
        activity: &'e ExecutableActivity,
        instance: &ScopeInstance,
    ) -> Result<Option<&'e ResolvedTransition>, AppError> {
        for transition in &activity.transitions {
            let taken = match &transition.condition {
                None => true,
                Some(condition) => self
                    .engine
                    .expressions
                    .evaluate_condition(condition, instance)
                    .map_err(|err| err.with_detail(CONTEXT_ACTIVITY_ID, activity.id()))?,
            };
            if taken {
                debug!(activity_id = activity.id(), target = %transition.target, "transition taken");
                return Ok(Some(transition));
            }
        }
        if let Some(default) = &activity.default_transition {
            debug!(activity_id = activity.id(), target = %default.target, "default transition taken");
            return Ok(Some(default));
        }
        Ok(None)
    }
}

fn element_instance(
    multi_instance: &MultiInstance,
    instance: &Arc<ScopeInstance>,
    index: usize,
    element: Value,
) -> Result<Arc<ScopeInstance>, AppError> {
    let variable = &multi_instance.element_variable;
    let value = TypedValue::resolve(element, variable.data_type.as_ref())
        .map_err(|err| err.with_detail(CONTEXT_PARAMETER_KEY, variable.id.clone()))?;
    let mut locals = IndexMap::new();
    locals.insert(variable.id.clone(), value);
    locals.insert(LOOP_COUNTER.to_string(), TypedValue::inferred(json!(index)));
    Ok(instance.overlay(locals))
}
