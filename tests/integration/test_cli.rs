use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::{contains, starts_with};
use procflow::core::workflow::model::{Activity, Condition, Transition, Variable, Workflow};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BIN: &str = "procflow";

fn procflow(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin(BIN).expect("binary should build");
    cmd.env_remove("PROCFLOW_REMOTE_AGENT")
        .env("HOME", workspace)
        .current_dir(workspace);
    cmd
}

fn approval() -> Workflow {
    Workflow::new()
        .id("approval")
        .variable(Variable::new("amount").default_value(42))
        .variable(Variable::new("approved").default_value(false))
        .activity(Activity::start_event("start").transition_to_next())
        .activity(
            Activity::exclusive_gateway("check")
                .transition(
                    Transition::new()
                        .id("large")
                        .condition(Condition::expr("amount > 100"))
                        .to("review"),
                )
                .transition(Transition::new().id("small").to("done"))
                .default_transition_id("small"),
        )
        .activity(
            Activity::none_task("review")
                .in_value("decision", true)
                .out("decision", "approved")
                .transition_to("done"),
        )
        .activity(Activity::end_event("done"))
}

fn write_json(dir: &TempDir, name: &str, workflow: &Workflow) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, workflow.to_json_string().unwrap()).unwrap();
    path
}

fn workspace_arg(dir: &TempDir) -> [String; 2] {
    ["--workspace".to_string(), dir.path().display().to_string()]
}

#[test]
fn version_flag_prints_crate_version() {
    let dir = TempDir::new().unwrap();
    procflow(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(starts_with(format!("{BIN} {}", procflow::VERSION)));
}

#[test]
fn validate_reports_fingerprint() {
    let dir = TempDir::new().unwrap();
    let file = write_json(&dir, "approval.json", &approval());

    procflow(dir.path())
        .arg("validate")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .success()
        .stdout(contains(": valid (5 scopes, 0 warnings, fingerprint "));
}

#[test]
fn validate_fails_on_definition_errors() {
    let dir = TempDir::new().unwrap();
    let broken = Workflow::new().activity(Activity::none_task("only").transition_to_next());
    let file = write_json(&dir, "broken.json", &broken);

    procflow(dir.path())
        .arg("validate")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .failure()
        .stderr(contains("PF-DEF-003"));
}

#[test]
fn lint_json_lists_issues() {
    let dir = TempDir::new().unwrap();
    let file = write_json(
        &dir,
        "island.json",
        &approval().activity(Activity::none_task("island")),
    );

    let output = procflow(dir.path())
        .arg("lint")
        .arg(&file)
        .args(["--format", "json"])
        .args(workspace_arg(&dir))
        .output()
        .unwrap();
    assert!(output.status.success());

    let issues: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(issues[0]["code"], "PF-LINT-001");
    assert_eq!(issues[0]["severity"], "warning");
    assert_eq!(issues[0]["location"], "/island");
}

#[test]
fn lint_text_fails_when_errors_exist() {
    let dir = TempDir::new().unwrap();
    let file = write_json(
        &dir,
        "bad.json",
        &Workflow::new().activity(Activity::script_task("calc", "1 +")),
    );

    procflow(dir.path())
        .arg("lint")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .failure()
        .stdout(contains("PF-EXPR-001 /calc"));
}

#[test]
fn convert_writes_bpmn_that_validates() {
    let dir = TempDir::new().unwrap();
    let source = write_json(&dir, "approval.json", &approval());
    let target = dir.path().join("approval.bpmn");

    procflow(dir.path())
        .arg("convert")
        .arg(&source)
        .args(["--to", "bpmn", "--output"])
        .arg(&target)
        .args(workspace_arg(&dir))
        .assert()
        .success()
        .stdout(contains("Wrote"));

    let xml = fs::read_to_string(&target).unwrap();
    assert!(xml.contains("exclusiveGateway"));
    let converted = Workflow::from_bpmn_str(&xml).unwrap();
    assert_eq!(converted.activities().len(), 4);

    procflow(dir.path())
        .arg("validate")
        .arg(&target)
        .args(workspace_arg(&dir))
        .assert()
        .success();
}

#[test]
fn convert_to_stdout() {
    let dir = TempDir::new().unwrap();
    let source = write_json(&dir, "approval.json", &approval());

    procflow(dir.path())
        .arg("convert")
        .arg(&source)
        .args(["--to", "yaml"])
        .args(workspace_arg(&dir))
        .assert()
        .success()
        .stdout(contains("exclusiveGateway").and(contains("amount > 100")));
}

#[test]
fn run_applies_variables() {
    let dir = TempDir::new().unwrap();
    let file = write_json(&dir, "approval.json", &approval());

    let output = procflow(dir.path())
        .arg("run")
        .arg(&file)
        .args(["--var", "amount=500", "--json"])
        .args(workspace_arg(&dir))
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["variables"]["approved"], true);
    assert_eq!(summary["variables"]["amount"], 500);
}

#[test]
fn run_prints_human_summary() {
    let dir = TempDir::new().unwrap();
    let file = write_json(&dir, "approval.json", &approval());

    procflow(dir.path())
        .arg("run")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .success()
        .stdout(contains("Status: completed").and(contains("\"approved\": false")));
}

#[test]
fn run_rejects_malformed_variables() {
    let dir = TempDir::new().unwrap();
    let file = write_json(&dir, "approval.json", &approval());

    procflow(dir.path())
        .arg("run")
        .arg(&file)
        .args(["--var", "=5"])
        .args(workspace_arg(&dir))
        .assert()
        .failure()
        .stderr(contains("variable name is empty"));
}

#[test]
fn workspace_config_limits_apply() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("procflow.toml"),
        "[engine]\nmax_activity_iterations = 2\nmax_workflow_iterations = 2\n",
    )
    .unwrap();
    let file = write_json(&dir, "approval.json", &approval());

    procflow(dir.path())
        .arg("run")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .failure()
        .stderr(contains("PF-EXEC-002"));
}

#[test]
fn configured_nesting_depth_applies_to_bpmn_files() {
    let dir = TempDir::new().unwrap();
    let mut innermost = Activity::none_task("leaf");
    for level in (0..40).rev() {
        innermost = Activity::sub_process(format!("level{}", level)).activity(innermost);
    }
    let deep = Workflow::new().activity(innermost);
    let file = dir.path().join("deep.bpmn");
    fs::write(&file, deep.to_bpmn_string_with_depth(64).unwrap()).unwrap();

    procflow(dir.path())
        .arg("validate")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .failure()
        .stderr(contains("PF-XML-009"));

    fs::write(
        dir.path().join("procflow.toml"),
        "[parser]\nmax_nesting_depth = 64\n",
    )
    .unwrap();
    procflow(dir.path())
        .arg("validate")
        .arg(&file)
        .args(workspace_arg(&dir))
        .assert()
        .success()
        .stdout(contains(": valid (42 scopes"));
}
