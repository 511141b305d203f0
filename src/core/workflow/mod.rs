//! Workflow definitions, interchange, expression evaluation and execution.

pub mod activity_type;
pub mod activity_types;
pub mod bpmn;
pub mod data;
pub mod executable;
pub mod executor;
pub mod expression;
pub mod ids;
pub mod instance;
pub mod lint;
pub mod model;
pub mod multi_instance;
pub mod parser;
pub mod script;

pub use activity_type::{
    ActivityContext, ActivityOutput, ActivityType, ActivityTypeRegistry,
    ActivityTypeRegistryBuilder,
};
pub use data::{DataType, TypedValue};
pub use executable::{ExecutableActivity, ExecutableScope, ExecutableWorkflow, ResolvedTransition};
pub use executor::{EngineSettings, ExecutionOverrides, ExecutionSummary, WorkflowEngine};
pub use expression::{CompiledExpression, ExpressionService, ResolvedInput};
pub use ids::{GroupId, UserId, WorkflowId};
pub use instance::ScopeInstance;
pub use lint::{IssueSeverity, ParseIssue};
pub use parser::{ParserSettings, WorkflowParseListener, WorkflowParser};
pub use script::{RhaiScriptService, ScriptException, ScriptLimits, ScriptResult, ScriptService};
