pub mod args;
pub mod commands;

pub use args::{
    ConvertArgs, ConvertTarget, LintArgs, LintFormat, RunArgs, ValidateArgs, WorkspaceArgs,
};
use clap::{Parser, Subcommand};
use std::path::Path;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
WORKFLOW COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "procflow")]
#[command(version = crate::VERSION)]
#[command(about = "Process orchestration engine for BPMN workflow definitions")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: lint a definition, convert it between formats, then run it with initial variables."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Parse a definition and report the first error",
        long_about = "Validate loads a workflow document, checks its structure, compiles every expression and prints its fingerprint.",
        after_help = "Example:\n    procflow validate order.bpmn"
    )]
    Validate(ValidateArgs),
    #[command(
        about = "List every diagnostic of a definition",
        long_about = "Lint reports structural errors, unreachable activities, gateway-free cycles, bad timers, identifier problems and expressions that fail to compile.",
        after_help = "Example:\n    procflow lint order.bpmn --format json"
    )]
    Lint(LintArgs),
    #[command(
        about = "Convert a definition between BPMN, JSON and YAML",
        after_help = "Example:\n    procflow convert order.json --to bpmn --output order.bpmn"
    )]
    Convert(ConvertArgs),
    #[command(
        about = "Execute a definition",
        long_about = "Run parses the definition, executes it with the given variables and prints the final root variables.",
        after_help = "Example:\n    procflow run order.bpmn --var amount=42 --var customer='\"ada\"'"
    )]
    Run(RunArgs),
}

impl Command {
    /// Workspace explicitly selected on the command line.
    pub fn workspace(&self) -> Option<&Path> {
        match self {
            Command::Validate(args) => args.workspace.root(),
            Command::Lint(args) => args.workspace.root(),
            Command::Convert(args) => args.workspace.root(),
            Command::Run(args) => args.workspace.root(),
        }
    }
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Validate(validate_args) => commands::validate(validate_args).await,
        Command::Lint(lint_args) => commands::lint(lint_args).await,
        Command::Convert(convert_args) => commands::convert(convert_args).await,
        Command::Run(run_args) => commands::run(run_args).await,
    }
}
