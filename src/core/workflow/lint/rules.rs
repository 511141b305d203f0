use super::{DefinitionLintRule, IssueSeverity, ParseIssue};
use crate::core::error::{AppError, CONTEXT_ACTIVITY_ID, CONTEXT_SCOPE_PATH};
use crate::core::types::ErrorCategory;
use crate::core::workflow::executable::{resolve_target, start_activity_indices};
use crate::core::workflow::model::{ActivityKind, Scope, ScopePath, Workflow};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub fn built_in_rules() -> Vec<Box<dyn DefinitionLintRule>> {
    vec![
        Box::new(StructureRule),
        Box::new(UnreachableActivitiesRule),
        Box::new(GatewayFreeCycleRule),
        Box::new(TimerDurationRule),
        Box::new(NcNameRule),
    ]
}

fn definition_error(
    code: &str,
    message: String,
    path: &ScopePath,
    activity_id: Option<&str>,
) -> AppError {
    let error = AppError::new(ErrorCategory::DefinitionError, message)
        .with_code(code)
        .with_detail(CONTEXT_SCOPE_PATH, path.to_string());
    match activity_id {
        Some(id) => error.with_detail(CONTEXT_ACTIVITY_ID, id),
        None => error,
    }
}

/// Hard structural faults of one scope. The definition must be normalized.
pub fn scope_errors(path: &ScopePath, scope: &Scope) -> Vec<AppError> {
    let mut out = Vec::new();

    let mut seen = HashSet::new();
    for activity in &scope.activities {
        if !seen.insert(activity.id.as_str()) {
            out.push(
                definition_error(
                    "PF-DEF-001",
                    format!("duplicate activity id '{}' in scope {}", activity.id, path),
                    path,
                    Some(&activity.id),
                )
                .with_suggestion("rename activities so every id in a scope is unique"),
            );
        }
    }

    let mut variables = HashSet::new();
    for variable in &scope.variables {
        if !variables.insert(variable.id.as_str()) {
            out.push(definition_error(
                "PF-DEF-012",
                format!("variable '{}' is declared twice in scope {}", variable.id, path),
                path,
                None,
            ));
        }
    }

    for transition in &scope.transitions {
        let message = match &transition.from {
            Some(from) => format!("transition from unknown activity '{}'", from),
            None => format!(
                "scope transition to {} has no source activity",
                transition.describe_target()
            ),
        };
        out.push(
            definition_error("PF-DEF-006", message, path, transition.from.as_deref())
                .with_suggestion("set 'from' to an activity of the same scope"),
        );
    }

    for (position, activity) in scope.activities.iter().enumerate() {
        for transition in &activity.outgoing_transitions {
            match (&transition.to, transition.to_next) {
                (Some(to), true) => out.push(definition_error(
                    "PF-DEF-004",
                    format!(
                        "transition of '{}' sets both a target '{}' and toNext",
                        activity.id, to
                    ),
                    path,
                    Some(&activity.id),
                )),
                (None, false) => out.push(definition_error(
                    "PF-DEF-004",
                    format!("transition of '{}' has no target", activity.id),
                    path,
                    Some(&activity.id),
                )),
                (Some(to), false) if resolve_target(scope, position, transition).is_none() => {
                    out.push(
                        definition_error(
                            "PF-DEF-002",
                            format!(
                                "transition from '{}' references unknown target '{}'",
                                activity.id, to
                            ),
                            path,
                            Some(&activity.id),
                        )
                        .with_suggestion("point transitions to an activity of the same scope"),
                    )
                }
                (None, true) if resolve_target(scope, position, transition).is_none() => out.push(
                    definition_error(
                        "PF-DEF-003",
                        format!(
                            "'{}' is the last activity of its scope and has no next activity",
                            activity.id
                        ),
                        path,
                        Some(&activity.id),
                    ),
                ),
                _ => {}
            }
        }

        if let Some(default_id) = &activity.default_transition_id {
            if activity.find_outgoing(default_id).is_none() {
                out.push(definition_error(
                    "PF-DEF-005",
                    format!(
                        "default transition '{}' of '{}' is not one of its outgoing transitions",
                        default_id, activity.id
                    ),
                    path,
                    Some(&activity.id),
                ));
            }
        }
    }

    out
}

struct StructureRule;

impl DefinitionLintRule for StructureRule {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        workflow
            .scopes()
            .into_iter()
            .flat_map(|(path, scope)| scope_errors(&path, scope))
            .map(|error| ParseIssue::from(&error))
            .collect()
    }
}

fn scope_graph(scope: &Scope) -> DiGraph<usize, ()> {
    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..scope.activities.len())
        .map(|position| graph.add_node(position))
        .collect();
    for (position, activity) in scope.activities.iter().enumerate() {
        for transition in &activity.outgoing_transitions {
            if let Some(target) = resolve_target(scope, position, transition) {
                graph.add_edge(nodes[position], nodes[target], ());
            }
        }
    }
    graph
}

struct UnreachableActivitiesRule;

impl DefinitionLintRule for UnreachableActivitiesRule {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let mut out = Vec::new();
        for (path, scope) in workflow.scopes() {
            let graph = scope_graph(scope);
            let mut reachable = HashSet::new();
            for start in start_activity_indices(scope) {
                let mut bfs = Bfs::new(&graph, NodeIndex::new(start));
                while let Some(node) = bfs.next(&graph) {
                    reachable.insert(graph[node]);
                }
            }
            for (position, activity) in scope.activities.iter().enumerate() {
                if !reachable.contains(&position) {
                    out.push(ParseIssue::new(
                        "PF-LINT-001",
                        IssueSeverity::Warning,
                        format!("activity '{}' is unreachable from the scope start", activity.id),
                        Some(path.activity(&activity.id)),
                        Some("connect the activity from a reachable transition or remove it".to_string()),
                    ));
                }
            }
        }
        out
    }
}

struct GatewayFreeCycleRule;

impl DefinitionLintRule for GatewayFreeCycleRule {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let mut out = Vec::new();
        for (path, scope) in workflow.scopes() {
            let graph = scope_graph(scope);
            for component in tarjan_scc(&graph) {
                let is_cycle = component.len() > 1
                    || graph.find_edge(component[0], component[0]).is_some();
                if !is_cycle {
                    continue;
                }
                let mut members: Vec<usize> = component.iter().map(|&node| graph[node]).collect();
                members.sort_unstable();
                let guarded = members.iter().any(|&position| {
                    matches!(scope.activities[position].kind, ActivityKind::ExclusiveGateway)
                });
                if guarded {
                    continue;
                }
                let ids: Vec<&str> = members
                    .iter()
                    .map(|&position| scope.activities[position].id.as_str())
                    .collect();
                out.push(ParseIssue::new(
                    "PF-LINT-002",
                    IssueSeverity::Info,
                    format!("activities {} form a cycle without an exclusive gateway", ids.join(", ")),
                    Some(path.activity(ids[0])),
                    Some("route the loop through an exclusive gateway with an exit condition".to_string()),
                ));
            }
        }
        out
    }
}

struct TimerDurationRule;

impl DefinitionLintRule for TimerDurationRule {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let mut out = Vec::new();
        for (path, scope) in workflow.scopes() {
            for timer in &scope.timers {
                let location = Some(format!("{} (timer {})", path, timer.id));
                match &timer.duration {
                    Some(duration) => {
                        if let Err(err) = humantime::parse_duration(duration) {
                            out.push(ParseIssue::new(
                                "PF-LINT-003",
                                IssueSeverity::Error,
                                format!("timer '{}' has invalid duration '{}': {}", timer.id, duration, err),
                                location,
                                Some("use a duration such as '30s', '5m' or '1h 30m'".to_string()),
                            ));
                        }
                    }
                    None if timer.due_date_expression.is_none() => out.push(ParseIssue::new(
                        "PF-LINT-004",
                        IssueSeverity::Warning,
                        format!("timer '{}' has neither a duration nor a due date", timer.id),
                        location,
                        None,
                    )),
                    None => {}
                }
            }
        }
        out
    }
}

const NCNAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.\-]*$";

fn ncname() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(NCNAME_PATTERN).expect("NCName pattern compiles"))
}

struct NcNameRule;

impl DefinitionLintRule for NcNameRule {
    fn validate(&self, workflow: &Workflow) -> Vec<ParseIssue> {
        let pattern = ncname();
        let mut out = Vec::new();
        let mut check = |kind: &str, id: &str, location: String| {
            if !pattern.is_match(id) {
                out.push(ParseIssue::new(
                    "PF-LINT-005",
                    IssueSeverity::Warning,
                    format!("{} id '{}' is not a valid XML name", kind, id),
                    Some(location),
                    Some("start ids with a letter or '_' and avoid spaces and ':'".to_string()),
                ));
            }
        };
        for (path, scope) in workflow.scopes() {
            for activity in &scope.activities {
                check("activity", &activity.id, path.activity(&activity.id));
                for transition in &activity.outgoing_transitions {
                    if let Some(id) = &transition.id {
                        check("transition", id, path.activity(&activity.id));
                    }
                }
            }
            for variable in &scope.variables {
                check("variable", &variable.id, path.to_string());
            }
        }
        out
    }
}
