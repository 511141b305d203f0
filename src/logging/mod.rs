pub mod config;
pub mod context;
pub mod layers;

pub use context::{detect_context, ExecutionContext};
pub use layers::console::ConsoleOutput;

use crate::cli::Command;
use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file, opentelemetry};
use crate::Result;
use anyhow::{anyhow, Context};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;
use url::Url;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Guards that keep logging sinks active for the duration of the command.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    _otel_guard: Option<opentelemetry::OpenTelemetryGuard>,
    console_output: ConsoleOutput,
    log_file_path: PathBuf,
}

impl LoggingGuard {
    /// Returns the console output configuration used during initialization.
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    /// Returns the log file path backed by the file sink.
    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}

/// Initialize the logging framework for the provided CLI command.
///
/// Configures the level filter, the file sink, the console sink and optional
/// OpenTelemetry export. Errors when invoked more than once per process.
pub fn init(command: &Command) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let context = detect_context(command);
    let workspace_root = resolve_workspace_path(command);
    let config = LoggingConfig::load(workspace_root.as_deref())?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;
    let log_file_path = file::log_file_path(&config, workspace_root.as_deref())?;

    type FileSubscriber = file::FileLayerStack<Registry>;
    type ConsoleSubscriber = console::ConsoleLayerStack<FileSubscriber>;

    let (file_layer, file_guard) = file::file_layer::<Registry>(&log_file_path, config.enable_file)?;
    let subscriber = tracing_subscriber::registry().with(file_layer);

    let console_output = console::select_console_output(context, config.console_output);
    let subscriber = subscriber.with(console::console_layer::<FileSubscriber>(console_output));

    let (otel_layer, otel_guard) = match otel_endpoint(&config) {
        Some(endpoint) => match opentelemetry::build_opentelemetry_layer::<ConsoleSubscriber>(
            &endpoint,
            &config.opentelemetry.service_name,
        ) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                eprintln!("OpenTelemetry disabled: {:#}", err);
                (None, None)
            }
        },
        None => (None, None),
    };

    subscriber.with(otel_layer).with(env_filter).init();

    tracing::debug!(
        ?context,
        console = %console_output,
        log_file = %log_file_path.display(),
        "logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
        _otel_guard: otel_guard,
        console_output,
        log_file_path,
    })
}

fn otel_endpoint(config: &LoggingConfig) -> Option<Url> {
    if !config.opentelemetry.enabled {
        return None;
    }
    config
        .opentelemetry
        .endpoint
        .as_deref()
        .and_then(|endpoint| Url::parse(endpoint).ok())
}

/// Workspace whose `.procflow/` directory holds logging config and logs.
fn resolve_workspace_path(command: &Command) -> Option<PathBuf> {
    command
        .workspace()
        .map(Path::to_path_buf)
        .or_else(|| env::current_dir().ok())
}
