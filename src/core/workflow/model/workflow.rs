#![allow(clippy::result_large_err)] // Workflow loading returns AppError to keep interchange context without boxing.

use super::activity::Activity;
use super::scope::{Scope, ScopePath, Timer, Variable};
use super::transition::Transition;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::bpmn;
use crate::core::workflow::ids::{deserialize_optional_id, GroupId, UserId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Interchange format of a workflow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Bpmn,
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("bpmn") | Some("xml") => Ok(DocumentFormat::Bpmn),
            Some("json") => Ok(DocumentFormat::Json),
            Some("yaml") | Some("yml") => Ok(DocumentFormat::Yaml),
            _ => Err(AppError::new(
                ErrorCategory::InterchangeError,
                format!(
                    "cannot infer workflow format of {}; expected .bpmn, .xml, .json, .yaml or .yml",
                    path.display()
                ),
            )
            .with_code("PF-XML-010")),
        }
    }
}

/// Root scope of a workflow definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_group_id: Option<GroupId>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub creator_id: Option<UserId>,
    #[serde(flatten)]
    pub scope: Scope,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn source_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.source_workflow_id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn owner_group_id(mut self, group_id: impl Into<GroupId>) -> Self {
        self.owner_group_id = Some(group_id.into());
        self
    }

    pub fn activity(mut self, activity: Activity) -> Self {
        self.scope.activities.push(activity);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.scope.transitions.push(transition);
        self
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.scope.variables.push(variable);
        self
    }

    pub fn timer(mut self, timer: Timer) -> Self {
        self.scope.timers.push(timer);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope.properties.insert(key.into(), value.into());
        self
    }

    /// Every scope of the definition with its path, parents before children.
    pub fn scopes(&self) -> Vec<(ScopePath, &Scope)> {
        let mut out = Vec::new();
        let mut pending = vec![(ScopePath::root(), &self.scope)];
        while let Some((path, scope)) = pending.pop() {
            for activity in scope.activities.iter().rev() {
                pending.push((path.child(&activity.id), &activity.scope));
            }
            out.push((path, scope));
        }
        out
    }

    /// Every activity of the definition with the path of its parent scope.
    pub fn activities(&self) -> Vec<(ScopePath, &Activity)> {
        self.scopes()
            .into_iter()
            .flat_map(|(path, scope)| {
                scope
                    .activities
                    .iter()
                    .map(move |activity| (path.clone(), activity))
            })
            .collect()
    }

    /// Canonical form used for structural comparison: scope-level transitions
    /// that name a source activity are folded onto that activity.
    pub fn normalized(&self) -> Workflow {
        let mut copy = self.clone();
        let mut pending: Vec<&mut Scope> = vec![&mut copy.scope];
        while let Some(scope) = pending.pop() {
            scope.fold_scope_transitions();
            for activity in scope.activities.iter_mut() {
                pending.push(&mut activity.scope);
            }
        }
        copy
    }

    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::InterchangeError,
                format!("failed to parse workflow JSON: {}", err),
            )
            .with_code("PF-XML-011")
        })
    }

    pub fn to_json_string(&self) -> Result<String, AppError> {
        serde_json::to_string_pretty(self).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize workflow JSON: {}", err),
            )
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::InterchangeError,
                format!("failed to parse workflow YAML: {}", err),
            )
            .with_code("PF-XML-011")
        })
    }

    pub fn to_yaml_string(&self) -> Result<String, AppError> {
        serde_yaml::to_string(self).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize workflow YAML: {}", err),
            )
        })
    }

    pub fn from_bpmn_str(text: &str) -> Result<Self, AppError> {
        Self::from_bpmn_str_with_depth(text, bpmn::DEFAULT_MAX_DEPTH)
    }

    /// Read BPMN allowing scopes nested up to `max_depth` below the root.
    pub fn from_bpmn_str_with_depth(text: &str, max_depth: usize) -> Result<Self, AppError> {
        bpmn::read_workflow(text, max_depth)
    }

    pub fn to_bpmn_string(&self) -> Result<String, AppError> {
        self.to_bpmn_string_with_depth(bpmn::DEFAULT_MAX_DEPTH)
    }

    pub fn to_bpmn_string_with_depth(&self, max_depth: usize) -> Result<String, AppError> {
        bpmn::write_workflow(self, max_depth)
    }

    pub fn parse_str(text: &str, format: DocumentFormat) -> Result<Self, AppError> {
        Self::parse_str_with_depth(text, format, bpmn::DEFAULT_MAX_DEPTH)
    }

    /// `max_depth` bounds BPMN documents; JSON and YAML rely on their
    /// deserializers' recursion limits.
    pub fn parse_str_with_depth(
        text: &str,
        format: DocumentFormat,
        max_depth: usize,
    ) -> Result<Self, AppError> {
        match format {
            DocumentFormat::Bpmn => Self::from_bpmn_str_with_depth(text, max_depth),
            DocumentFormat::Json => Self::from_json_str(text),
            DocumentFormat::Yaml => Self::from_yaml_str(text),
        }
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String, AppError> {
        self.render_with_depth(format, bpmn::DEFAULT_MAX_DEPTH)
    }

    pub fn render_with_depth(
        &self,
        format: DocumentFormat,
        max_depth: usize,
    ) -> Result<String, AppError> {
        match format {
            DocumentFormat::Bpmn => self.to_bpmn_string_with_depth(max_depth),
            DocumentFormat::Json => self.to_json_string(),
            DocumentFormat::Yaml => self.to_yaml_string(),
        }
    }

    /// Load a workflow document, choosing the format from the file extension.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        Self::load_from_file_with_depth(path, bpmn::DEFAULT_MAX_DEPTH)
    }

    pub fn load_from_file_with_depth(path: &Path, max_depth: usize) -> Result<Self, AppError> {
        let format = DocumentFormat::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        Self::parse_str_with_depth(&text, format, max_depth)
            .map_err(|err| err.with_detail("file", path.display().to_string()))
    }
}
