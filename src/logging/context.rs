use crate::cli::Command;
use std::env;

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Interactive use from a terminal.
    LocalDev,
    /// Commands whose stdout is machine-readable and should stay quiet on the console.
    Batch,
    /// Engine runs driven by a remote agent on another host.
    RemoteAgent,
}

impl ExecutionContext {
    /// Returns `true` when console sinks should be disabled.
    pub fn disables_console(self) -> bool {
        matches!(self, ExecutionContext::Batch | ExecutionContext::RemoteAgent)
    }
}

/// Derive the active execution context from a parsed CLI command plus overrides.
pub fn detect_context(command: &Command) -> ExecutionContext {
    if remote_override_enabled() {
        return ExecutionContext::RemoteAgent;
    }

    match command {
        Command::Lint(args) if args.format.is_json() => ExecutionContext::Batch,
        Command::Convert(args) if args.output.is_none() => ExecutionContext::Batch,
        Command::Run(args) if args.json => ExecutionContext::Batch,
        Command::Validate(_) | Command::Lint(_) | Command::Convert(_) | Command::Run(_) => {
            ExecutionContext::LocalDev
        }
    }
}

fn remote_override_enabled() -> bool {
    env::var("PROCFLOW_REMOTE_AGENT")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
