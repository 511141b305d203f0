#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, CONTEXT_SCOPE_PATH};
use crate::core::workflow::data::{DataType, TypedValue};
use crate::core::workflow::model::{ScopePath, Variable};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Runtime variables of one scope, chained to the instance of its parent scope.
#[derive(Debug)]
pub struct ScopeInstance {
    id: Uuid,
    path: ScopePath,
    parent: Option<Arc<ScopeInstance>>,
    /// Declared variable ids with their declared type.
    declared: HashMap<String, Option<DataType>>,
    variables: RwLock<IndexMap<String, TypedValue>>,
}

impl ScopeInstance {
    /// Instance of the workflow root scope.
    pub fn root(declarations: &[Variable]) -> Result<Arc<Self>, AppError> {
        Self::create(ScopePath::root(), None, declarations)
    }

    /// Instance of the nested scope of activity `activity_id`.
    pub fn child(
        self: &Arc<Self>,
        activity_id: &str,
        declarations: &[Variable],
    ) -> Result<Arc<Self>, AppError> {
        Self::create(self.path.child(activity_id), Some(Arc::clone(self)), declarations)
    }

    /// Child instance holding `locals` without declaring them, used to expose
    /// activity inputs to a script.
    pub fn overlay(self: &Arc<Self>, locals: IndexMap<String, TypedValue>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            path: self.path.clone(),
            parent: Some(Arc::clone(self)),
            declared: HashMap::new(),
            variables: RwLock::new(locals),
        })
    }

    fn create(
        path: ScopePath,
        parent: Option<Arc<ScopeInstance>>,
        declarations: &[Variable],
    ) -> Result<Arc<Self>, AppError> {
        let mut declared = HashMap::new();
        let mut variables = IndexMap::new();
        for variable in declarations {
            declared.insert(variable.id.clone(), variable.data_type.clone());
            if let Some(default) = &variable.default_value {
                let value = TypedValue::resolve(default.clone(), variable.data_type.as_ref())
                    .map_err(|err| {
                        err.with_detail(CONTEXT_SCOPE_PATH, path.to_string())
                            .with_detail("variable", variable.id.clone())
                    })?;
                variables.insert(variable.id.clone(), value);
            }
        }
        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            path,
            parent,
            declared,
            variables: RwLock::new(variables),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &ScopePath {
        &self.path
    }

    pub fn parent(&self) -> Option<&Arc<ScopeInstance>> {
        self.parent.as_ref()
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, TypedValue>> {
        self.variables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, TypedValue>> {
        self.variables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Instances from this one up to the root.
    fn chain(&self) -> Vec<&ScopeInstance> {
        let mut chain = vec![self];
        let mut current = self.parent.as_deref();
        while let Some(instance) = current {
            chain.push(instance);
            current = instance.parent.as_deref();
        }
        chain
    }

    /// Variable lookup through this scope and its ancestors.
    pub fn get(&self, name: &str) -> Option<TypedValue> {
        self.chain()
            .into_iter()
            .find_map(|instance| instance.read().get(name).cloned())
    }

    /// Variables visible from this scope; inner scopes shadow outer ones.
    pub fn visible_variables(&self) -> IndexMap<String, Value> {
        let mut visible = IndexMap::new();
        for instance in self.chain().into_iter().rev() {
            for (name, value) in instance.read().iter() {
                visible.insert(name.clone(), value.value.clone());
            }
        }
        visible
    }

    /// Variables stored in this instance only.
    pub fn local_variables(&self) -> IndexMap<String, TypedValue> {
        self.read().clone()
    }

    pub fn set_local(&self, name: impl Into<String>, value: TypedValue) {
        self.write().insert(name.into(), value);
    }

    /// Write an activity output into the nearest scope declaring `name`, or
    /// into the root scope when none does. Returns the receiving scope path.
    pub fn write_output(&self, name: &str, value: Value) -> Result<ScopePath, AppError> {
        let chain = self.chain();
        let target = chain
            .iter()
            .find(|instance| instance.declares(name))
            .or_else(|| chain.last())
            .copied()
            .unwrap_or(self);
        let declared = target.declared.get(name).cloned().flatten();
        let typed = TypedValue::resolve(value, declared.as_ref()).map_err(|err| {
            err.with_detail(CONTEXT_SCOPE_PATH, target.path.to_string())
                .with_detail("variable", name)
        })?;
        target.set_local(name, typed);
        Ok(target.path.clone())
    }

    /// Apply a script update: the instance currently holding `name` (or
    /// declaring it) receives the value, otherwise this instance does.
    pub fn apply_update(&self, name: &str, value: TypedValue) {
        let chain = self.chain();
        let target = chain
            .iter()
            .find(|instance| instance.read().contains_key(name) || instance.declares(name))
            .copied()
            .unwrap_or(self);
        target.set_local(name, value);
    }
}
