//! Abstract workflow definition model.

pub mod activity;
pub mod binding;
pub mod multi_instance;
pub mod parameter;
pub mod scope;
pub mod transition;
pub mod workflow;

pub use activity::{Activity, ActivityKind};
pub use binding::{Binding, BindingSource};
pub use multi_instance::{CompletionCondition, MultiInstance, MultiInstanceMode};
pub use parameter::{InputParameter, OutputParameter};
pub use scope::{Scope, ScopePath, Timer, Variable};
pub use transition::{Condition, Transition};
pub use workflow::{DocumentFormat, Workflow};
