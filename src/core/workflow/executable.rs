#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::lint::ParseIssue;
use crate::core::workflow::model::{
    Activity, ActivityKind, Condition, Scope, ScopePath, Transition, Variable, Workflow,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Outgoing edge with its target resolved to an activity of the same scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTransition {
    pub id: Option<String>,
    pub target: String,
    pub condition: Option<Condition>,
}

/// Activity plus its resolved outgoing edges. The default transition is
/// held apart and only taken when no other edge applies.
#[derive(Debug, Clone)]
pub struct ExecutableActivity {
    pub activity: Arc<Activity>,
    pub transitions: Vec<ResolvedTransition>,
    pub default_transition: Option<ResolvedTransition>,
}

impl ExecutableActivity {
    pub fn id(&self) -> &str {
        &self.activity.id
    }

    /// Whether the engine runs a nested scope for this activity.
    pub fn is_container(&self) -> bool {
        self.activity.is_container() || matches!(self.activity.kind, ActivityKind::SubProcess)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutableScope {
    pub path: ScopePath,
    pub variables: Vec<Variable>,
    pub activities: Vec<ExecutableActivity>,
    index: HashMap<String, usize>,
    start: Vec<usize>,
}

impl ExecutableScope {
    pub fn activity(&self, id: &str) -> Option<&ExecutableActivity> {
        self.index.get(id).map(|&position| &self.activities[position])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Activities a run of this scope begins with.
    pub fn start_activities(&self) -> impl Iterator<Item = &ExecutableActivity> {
        self.start.iter().map(|&position| &self.activities[position])
    }
}

/// Definition checked and resolved by the parser, ready for the engine.
#[derive(Debug, Clone)]
pub struct ExecutableWorkflow {
    definition: Arc<Workflow>,
    root: Arc<ExecutableScope>,
    scopes: HashMap<ScopePath, Arc<ExecutableScope>>,
    fingerprint: String,
    issues: Vec<ParseIssue>,
}

impl ExecutableWorkflow {
    /// Build from a normalized definition that already passed the
    /// structural checks.
    pub(crate) fn build(definition: Workflow, issues: Vec<ParseIssue>) -> Result<Self, AppError> {
        let fingerprint = fingerprint(&definition)?;
        let mut scopes = HashMap::new();
        for (path, scope) in definition.scopes() {
            let executable = build_scope(path.clone(), scope)?;
            scopes.insert(path, Arc::new(executable));
        }
        let root = scopes.get(&ScopePath::root()).cloned().ok_or_else(|| {
            AppError::new(ErrorCategory::InternalError, "workflow has no root scope")
                .with_code("PF-DEF-013")
        })?;
        Ok(Self {
            definition: Arc::new(definition),
            root,
            scopes,
            fingerprint,
            issues,
        })
    }

    pub fn definition(&self) -> &Arc<Workflow> {
        &self.definition
    }

    pub fn root(&self) -> &Arc<ExecutableScope> {
        &self.root
    }

    pub fn scope(&self, path: &ScopePath) -> Option<&Arc<ExecutableScope>> {
        self.scopes.get(path)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Arc<ExecutableScope>> {
        self.scopes.values()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Hex SHA-256 of the normalized definition's JSON form.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Non-fatal diagnostics found while parsing.
    pub fn issues(&self) -> &[ParseIssue] {
        &self.issues
    }
}

pub fn fingerprint(workflow: &Workflow) -> Result<String, AppError> {
    let canonical = serde_json::to_vec(workflow).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize workflow for fingerprinting: {}", err),
        )
        .with_code("PF-XML-008")
    })?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

fn build_scope(path: ScopePath, scope: &Scope) -> Result<ExecutableScope, AppError> {
    let index: HashMap<String, usize> = scope
        .activities
        .iter()
        .enumerate()
        .map(|(position, activity)| (activity.id.clone(), position))
        .collect();

    let mut activities = Vec::with_capacity(scope.activities.len());
    for (position, activity) in scope.activities.iter().enumerate() {
        let mut transitions = Vec::new();
        let mut default_transition = None;
        for transition in &activity.outgoing_transitions {
            let target = resolve_target(scope, position, transition).ok_or_else(|| {
                AppError::new(
                    ErrorCategory::InternalError,
                    format!(
                        "transition of {} to {} was not resolved",
                        activity.id,
                        transition.describe_target()
                    ),
                )
                .with_code("PF-DEF-002")
            })?;
            let resolved = ResolvedTransition {
                id: transition.id.clone(),
                target: scope.activities[target].id.clone(),
                condition: transition.condition.clone(),
            };
            let is_default = activity.default_transition_id.is_some()
                && transition.id == activity.default_transition_id;
            if is_default && default_transition.is_none() {
                default_transition = Some(resolved);
            } else {
                transitions.push(resolved);
            }
        }
        activities.push(ExecutableActivity {
            activity: Arc::new(activity.clone()),
            transitions,
            default_transition,
        });
    }

    Ok(ExecutableScope {
        path,
        variables: scope.variables.clone(),
        activities,
        index,
        start: start_activity_indices(scope),
    })
}

/// Position of the activity a transition leads to, if it resolves.
pub(crate) fn resolve_target(scope: &Scope, from: usize, transition: &Transition) -> Option<usize> {
    match (&transition.to, transition.to_next) {
        (Some(to), false) => scope.activities.iter().position(|a| &a.id == to),
        (None, true) if from + 1 < scope.activities.len() => Some(from + 1),
        _ => None,
    }
}

/// Start events of the scope; otherwise the activities nothing leads to;
/// otherwise the first activity.
pub(crate) fn start_activity_indices(scope: &Scope) -> Vec<usize> {
    let starts: Vec<usize> = scope
        .activities
        .iter()
        .enumerate()
        .filter(|(_, activity)| matches!(activity.kind, ActivityKind::StartEvent))
        .map(|(position, _)| position)
        .collect();
    if !starts.is_empty() {
        return starts;
    }

    let mut targeted = vec![false; scope.activities.len()];
    for (position, activity) in scope.activities.iter().enumerate() {
        for transition in &activity.outgoing_transitions {
            if let Some(target) = resolve_target(scope, position, transition) {
                targeted[target] = true;
            }
        }
    }
    let roots: Vec<usize> = targeted
        .iter()
        .enumerate()
        .filter(|(_, hit)| !**hit)
        .map(|(position, _)| position)
        .collect();
    if !roots.is_empty() || scope.activities.is_empty() {
        return roots;
    }
    vec![0]
}
