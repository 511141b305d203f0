#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::data::TypedValue;
use crate::core::workflow::instance::ScopeInstance;
use indexmap::IndexMap;
use rhai::packages::{Package, StandardPackage};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position, Module, Scope, AST};
type SharedModule = std::sync::Arc<Module>;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Fault raised by a script while it ran.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ScriptException {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

/// Record of a single script evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptResult {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ScriptException>,
    /// Text the script printed, one line per print/debug call.
    #[serde(default)]
    pub logs: String,
    /// Variables the script assigned, by name.
    #[serde(default)]
    pub updates: IndexMap<String, TypedValue>,
}

impl ScriptResult {
    pub fn is_success(&self) -> bool {
        self.exception.is_none()
    }
}

/// Opaque compiled form of a script, produced by a [`ScriptService`].
#[derive(Clone)]
pub struct CompiledScript {
    text: Arc<str>,
    handle: Arc<dyn Any + Send + Sync>,
}

impl CompiledScript {
    pub fn new(text: &str, handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            text: Arc::from(text),
            handle,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn handle<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledScript")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// Contract of the script runtime behind expressions and script tasks.
pub trait ScriptService: Send + Sync {
    /// Language identifier, e.g. `rhai`.
    fn language(&self) -> &str;

    /// Parse `text` once; the handle is reused for every evaluation.
    fn compile(&self, text: &str) -> Result<CompiledScript, AppError>;

    /// Run a compiled script against the variables visible from `instance`.
    /// Faults are reported in [`ScriptResult::exception`], never as panics.
    fn evaluate(&self, instance: &ScopeInstance, script: &CompiledScript) -> ScriptResult;
}

/// Resource limits applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 50_000,
            max_call_levels: 64,
            max_expr_depth: 64,
        }
    }
}

/// Script service backed by a locked-down Rhai configuration: standard
/// functions only, no module imports, bounded operations.
pub struct RhaiScriptService {
    limits: ScriptLimits,
    library: SharedModule,
    compiler: Engine,
}

impl Default for RhaiScriptService {
    fn default() -> Self {
        Self::new(ScriptLimits::default())
    }
}

impl RhaiScriptService {
    pub fn new(limits: ScriptLimits) -> Self {
        let library = StandardPackage::new().as_shared_module();
        Self {
            limits,
            compiler: raw_engine(&limits, &library),
            library,
        }
    }

    pub fn limits(&self) -> ScriptLimits {
        self.limits
    }
}

fn raw_engine(limits: &ScriptLimits, library: &SharedModule) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(library.clone());
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine
}

fn append_line(logs: &Mutex<String>, line: &str) {
    let mut logs = logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    logs.push_str(line);
    logs.push('\n');
}

fn exception_from(err: &EvalAltResult) -> ScriptException {
    let position: Position = err.position();
    ScriptException {
        message: err.to_string(),
        line: position.line(),
        column: position.position(),
    }
}

impl ScriptService for RhaiScriptService {
    fn language(&self) -> &str {
        "rhai"
    }

    fn compile(&self, text: &str) -> Result<CompiledScript, AppError> {
        let ast = self.compiler.compile(text).map_err(|err| {
            AppError::new(
                ErrorCategory::CompileError,
                format!("expression compile error: {}", err),
            )
            .with_code("PF-EXPR-001")
            .with_detail("expression", text)
        })?;
        Ok(CompiledScript::new(text, Arc::new(ast)))
    }

    fn evaluate(&self, instance: &ScopeInstance, script: &CompiledScript) -> ScriptResult {
        let mut outcome = ScriptResult::default();
        let Some(ast) = script.handle::<AST>() else {
            outcome.exception = Some(ScriptException {
                message: format!("script '{}' was not compiled by rhai", script.text()),
                line: None,
                column: None,
            });
            return outcome;
        };

        // A fresh engine per evaluation keeps captured output apart.
        let logs = Arc::new(Mutex::new(String::new()));
        let mut engine = raw_engine(&self.limits, &self.library);
        let print_sink = Arc::clone(&logs);
        engine.on_print(move |text| append_line(&print_sink, text));
        let debug_sink = Arc::clone(&logs);
        engine.on_debug(move |text, _source, position| {
            append_line(&debug_sink, &format!("[{}] {}", position, text))
        });

        let visible = instance.visible_variables();
        let mut scope = Scope::new();
        for (name, value) in &visible {
            scope.push_dynamic(name.as_str(), to_dynamic(value));
        }

        match engine.eval_ast_with_scope::<Dynamic>(&mut scope, ast) {
            Ok(result) => {
                outcome.result = from_dynamic(result);
                for (name, _constant, value) in scope.iter() {
                    let value = from_dynamic(value);
                    if visible.get(name) != Some(&value) {
                        outcome
                            .updates
                            .insert(name.to_string(), TypedValue::inferred(value));
                    }
                }
            }
            Err(err) => outcome.exception = Some(exception_from(&err)),
        }
        outcome.logs = logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        outcome
    }
}

pub(crate) fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(u) = n.as_u64() {
                Dynamic::from(u)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::from(0_i64)
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let mut arr = Array::new();
            for item in items {
                arr.push(to_dynamic(item));
            }
            Dynamic::from_array(arr)
        }
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.into(), to_dynamic(value));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

pub(crate) fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Some(i) = value.clone().try_cast::<i32>() {
        return Value::Number(Number::from(i));
    }
    if let Some(u) = value.clone().try_cast::<u64>() {
        return Value::Number(Number::from(u));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        if let Some(num) = Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(c) = value.clone().try_cast::<char>() {
        return Value::String(c.to_string());
    }
    if let Some(arr) = value.clone().try_cast::<Array>() {
        return Value::Array(arr.into_iter().map(from_dynamic).collect());
    }
    if let Some(map) = value.try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (key, value) in map {
            json_map.insert(key.into(), from_dynamic(value));
        }
        return Value::Object(json_map);
    }
    Value::Null
}
