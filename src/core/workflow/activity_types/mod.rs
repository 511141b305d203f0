#![allow(clippy::result_large_err)]

pub mod pass_through;
pub mod script_task;

use crate::core::error::AppError;
use crate::core::workflow::activity_type::{ActivityTypeRegistry, ActivityTypeRegistryBuilder};

pub use pass_through::{PassThroughActivity, RESULT_KEY};
pub use script_task::ScriptTaskActivity;

/// Register the built-in activity types into the supplied builder.
pub fn register_builtins(builder: &mut ActivityTypeRegistryBuilder) -> Result<(), AppError> {
    builder
        .register(PassThroughActivity::start_event())?
        .register(PassThroughActivity::end_event())?
        .register(PassThroughActivity::none_task())?
        .register(PassThroughActivity::exclusive_gateway())?
        .register(ScriptTaskActivity::new())?;
    Ok(())
}

/// Registry holding only the built-in activity types.
pub fn builtin_registry() -> Result<ActivityTypeRegistry, AppError> {
    let mut builder = ActivityTypeRegistry::builder();
    register_builtins(&mut builder)?;
    Ok(builder.build())
}
