use crate::cli::args::{ConvertArgs, ConvertTarget, LintArgs, RunArgs, ValidateArgs, WorkspaceArgs};
use crate::core::config::{ConfigLoader, ProcflowConfig};
use crate::core::workflow::activity_types::builtin_registry;
use crate::core::workflow::model::{DocumentFormat, Workflow};
use crate::core::workflow::{
    ExecutionOverrides, ExpressionService, IssueSeverity, ParseIssue, WorkflowEngine,
    WorkflowParser,
};
use crate::Result;
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Load procflow.toml from the selected workspace, or the current directory.
fn load_config(workspace: &WorkspaceArgs) -> Result<ProcflowConfig> {
    let root = match workspace.root() {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().context("failed to resolve current directory")?,
    };
    Ok(ConfigLoader::load_from_workspace(&root)?)
}

fn build_parser(config: &ProcflowConfig) -> WorkflowParser {
    let expressions = Arc::new(ExpressionService::with_limits(config.expression.limits()));
    WorkflowParser::new(expressions, config.parser.settings())
}

fn load_workflow(path: &Path, config: &ProcflowConfig) -> Result<Workflow> {
    Ok(Workflow::load_from_file_with_depth(
        path,
        config.parser.max_nesting_depth,
    )?)
}

fn format_issue(issue: &ParseIssue) -> String {
    let mut line = format!(
        "{} {} {}: {}",
        issue.severity,
        issue.code,
        issue.location.as_deref().unwrap_or("/"),
        issue.message
    );
    if let Some(suggestion) = &issue.suggestion {
        line.push_str(&format!(" (hint: {})", suggestion));
    }
    line
}

pub async fn validate(args: ValidateArgs) -> Result<()> {
    let config = load_config(&args.workspace)?;
    let parser = build_parser(&config);
    let workflow = load_workflow(&args.file, &config)?;

    let executable = parser.parse(&workflow).map_err(|err| {
        tracing::error!(code = %err.code, "validation failed: {}", err.message);
        err
    })?;

    for issue in executable.issues() {
        println!("{}", format_issue(issue));
    }
    println!(
        "{}: valid ({} scopes, {} warnings, fingerprint {})",
        args.file.display(),
        executable.scope_count(),
        executable.issues().len(),
        executable.fingerprint()
    );
    Ok(())
}

pub async fn lint(args: LintArgs) -> Result<()> {
    let config = load_config(&args.workspace)?;
    let parser = build_parser(&config);
    let workflow = load_workflow(&args.file, &config)?;
    let issues = parser.lint(&workflow);

    if args.format.is_json() {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("{}: no issues found", args.file.display());
    } else {
        for issue in &issues {
            println!("{}", format_issue(issue));
        }
    }

    let errors = issues
        .iter()
        .filter(|issue| issue.severity == IssueSeverity::Error)
        .count();
    if errors > 0 {
        return Err(anyhow!(
            "{} has {} error(s)",
            args.file.display(),
            errors
        ));
    }
    Ok(())
}

pub async fn convert(args: ConvertArgs) -> Result<()> {
    let config = load_config(&args.workspace)?;
    let workflow = load_workflow(&args.file, &config)?;
    let format = match args.to {
        ConvertTarget::Bpmn => DocumentFormat::Bpmn,
        ConvertTarget::Json => DocumentFormat::Json,
        ConvertTarget::Yaml => DocumentFormat::Yaml,
    };
    let rendered = workflow.render_with_depth(format, config.parser.max_nesting_depth)?;

    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(
                from = %args.file.display(),
                to = %path.display(),
                "workflow converted"
            );
            println!("Wrote {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Split `NAME=VALUE`; the value is read as JSON, falling back to a plain string.
pub fn parse_variable(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid --var '{}'; expected NAME=VALUE", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("invalid --var '{}'; variable name is empty", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub async fn run(args: RunArgs) -> Result<()> {
    tracing::info!(file = %args.file.display(), "starting workflow run");

    let config = load_config(&args.workspace)?;
    let parser = build_parser(&config);
    let workflow = load_workflow(&args.file, &config)?;
    let executable = parser.parse(&workflow)?;

    let mut variables = IndexMap::new();
    for raw in &args.vars {
        let (name, value) = parse_variable(raw)?;
        variables.insert(name, value);
    }

    let settings = config.engine.settings().with_overrides(&ExecutionOverrides {
        parallel_limit: args.parallel_limit,
        max_time_seconds: args.max_time,
    });
    let engine = WorkflowEngine::new(
        builtin_registry()?,
        Arc::clone(parser.expressions()),
        settings,
    );

    let summary = match engine.run(&executable, variables).await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(code = %err.code, "workflow run failed: {}", err.message);
            eprintln!("Workflow run failed: {}", err);
            return Err(err.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Execution ID: {}", summary.execution_id);
    println!("Status: {}", summary.status.as_str());
    println!("Activity runs: {}", summary.activity_runs.len());
    println!(
        "Duration: {}",
        summary
            .completed_at
            .signed_duration_since(summary.started_at)
    );
    println!("Variables:");
    println!("{}", serde_json::to_string_pretty(&summary.variables)?);
    Ok(())
}
