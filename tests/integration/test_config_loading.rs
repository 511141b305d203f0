use procflow::core::config::ConfigLoader;
use procflow::core::types::ErrorCategory;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn clear_procflow_env() {
    for v in &[
        "PROCFLOW_PARSER_EAGER_COMPILE",
        "PROCFLOW_PARSER_MAX_NESTING_DEPTH",
        "PROCFLOW_ENGINE_PARALLEL_LIMIT",
        "PROCFLOW_ENGINE_MAX_TIME_SECONDS",
        "PROCFLOW_ENGINE_MAX_ACTIVITY_ITERATIONS",
        "PROCFLOW_ENGINE_MAX_WORKFLOW_ITERATIONS",
        "PROCFLOW_EXPRESSION_MAX_OPERATIONS",
        "PROCFLOW_EXPRESSION_MAX_CALL_LEVELS",
        "PROCFLOW_EXPRESSION_MAX_EXPR_DEPTH",
    ] {
        env::remove_var(v);
    }
}

/// Full procflow.toml flows into parser, engine and script settings.
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_procflow_env();
    let temp_dir = TempDir::new().unwrap();
    let workspace_path = temp_dir.path();

    let config_content = r#"
[parser]
eager_compile = false
max_nesting_depth = 8

[engine]
parallel_limit = 2
max_time_seconds = 30
max_activity_iterations = 10
max_workflow_iterations = 500

[expression]
max_operations = 1000
max_call_levels = 16
max_expr_depth = 24
"#;
    fs::write(workspace_path.join("procflow.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_workspace(workspace_path).unwrap();

    let parser = config.parser.settings();
    assert!(!parser.eager_compile);
    assert_eq!(parser.max_nesting_depth, 8);

    let engine = config.engine.settings();
    assert_eq!(engine.parallel_limit, 2);
    assert_eq!(engine.max_time_seconds, 30);
    assert_eq!(engine.max_activity_iterations, 10);
    assert_eq!(engine.max_workflow_iterations, 500);

    let limits = config.expression.limits();
    assert_eq!(limits.max_operations, 1000);
    assert_eq!(limits.max_call_levels, 16);
    assert_eq!(limits.max_expr_depth, 24);
}

/// Environment variables win over the file.
#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_procflow_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("procflow.toml"),
        "[engine]\nparallel_limit = 2\n",
    )
    .unwrap();

    env::set_var("PROCFLOW_ENGINE_PARALLEL_LIMIT", "6");
    env::set_var("PROCFLOW_PARSER_EAGER_COMPILE", "false");
    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_procflow_env();

    assert_eq!(config.engine.parallel_limit, 6);
    assert!(!config.parser.eager_compile);
    assert_eq!(config.engine.max_time_seconds, 300);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_procflow_env();
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();

    assert!(config.parser.eager_compile);
    assert_eq!(config.parser.max_nesting_depth, 32);
    assert_eq!(config.engine.parallel_limit, 4);
    assert_eq!(config.engine.max_workflow_iterations, 10_000);
    assert_eq!(config.expression.max_operations, 50_000);
}

#[test]
#[serial]
fn test_invalid_files_are_reported() {
    clear_procflow_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("procflow.toml");

    fs::write(&path, "[engine\nparallel_limit = 2").unwrap();
    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "PF-CFG-002");

    fs::write(&path, "[engine]\nmax_time_seconds = 0\n").unwrap();
    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "PF-CFG-003");
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(err.detail("key"), Some("engine.max_time_seconds"));

    fs::write(
        &path,
        "[engine]\nmax_activity_iterations = 50\nmax_workflow_iterations = 10\n",
    )
    .unwrap();
    let err = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap_err();
    assert_eq!(err.code, "PF-CFG-004");
}

#[test]
#[serial]
fn test_unparseable_env_value_is_ignored() {
    clear_procflow_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("PROCFLOW_ENGINE_MAX_TIME_SECONDS", "soon");
    let config = ConfigLoader::load_from_workspace(temp_dir.path()).unwrap();
    clear_procflow_env();
    assert_eq!(config.engine.max_time_seconds, 300);
}
