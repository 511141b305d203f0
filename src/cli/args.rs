use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};

/// Location of `procflow.toml` and the `.procflow/` directory.
#[derive(Args, Clone, Debug, Default)]
pub struct WorkspaceArgs {
    /// Workspace holding procflow.toml and .procflow/ (default: current directory)
    #[arg(long, value_name = "PATH")]
    pub workspace: Option<PathBuf>,
}

impl WorkspaceArgs {
    pub fn root(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Workflow document (.bpmn, .xml, .json, .yaml or .yml)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LintFormat {
    #[default]
    Text,
    Json,
}

impl LintFormat {
    pub fn is_json(self) -> bool {
        self == LintFormat::Json
    }
}

#[derive(Args, Clone, Debug)]
pub struct LintArgs {
    /// Workflow document to inspect
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output format for the diagnostics
    #[arg(long, value_enum, default_value_t = LintFormat::Text)]
    pub format: LintFormat,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConvertTarget {
    Bpmn,
    Json,
    Yaml,
}

#[derive(Args, Clone, Debug)]
pub struct ConvertArgs {
    /// Workflow document to convert
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Target interchange format
    #[arg(long, value_enum)]
    pub to: ConvertTarget,

    /// Write the converted document here instead of stdout
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Workflow document to execute
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Initial root variable as NAME=JSON; bare text is taken as a string
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Concurrent activities per scope (overrides engine.parallel_limit)
    #[arg(long, value_name = "N", help_heading = "Engine Overrides")]
    pub parallel_limit: Option<usize>,

    /// Wall-clock budget in seconds (overrides engine.max_time_seconds)
    #[arg(long, value_name = "SECONDS", help_heading = "Engine Overrides")]
    pub max_time: Option<u64>,

    /// Print the execution summary as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}
