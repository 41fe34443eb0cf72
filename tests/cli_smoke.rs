//! `sprintctl` CLI smoke tests.
//!
//! Grounded on the teacher's `tests/cli_integration_test.rs`: an
//! `AssertExt` convenience trait layered over `assert_cmd`, a
//! `run_json` helper for commands that print `--json`, and one test
//! per observable CLI behaviour rather than one giant end-to-end walk.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

trait AssertExt {
    fn success_without_warnings(self) -> assert_cmd::assert::Assert;
}

impl AssertExt for assert_cmd::assert::Assert {
    fn success_without_warnings(self) -> assert_cmd::assert::Assert {
        self.success().stderr(predicate::str::contains("WARN").not())
    }
}

fn sprintctl_cmd(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("sprintctl").expect("sprintctl binary built");
    cmd.current_dir(dir);
    cmd
}

fn run_json(dir: &std::path::Path, args: &[&str]) -> Value {
    let output = sprintctl_cmd(dir).args(args).output().expect("sprintctl invocation failed");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("stdout was not valid JSON")
}

#[test]
fn init_scaffolds_the_sprint_directory() {
    let dir = tempfile::tempdir().unwrap();
    sprintctl_cmd(dir.path()).arg("init").assert().success_without_warnings();

    assert!(dir.path().join(".sprint/config.yaml").exists());
    assert!(dir.path().join(".sprint/sprints").is_dir());
    assert!(dir.path().join(".sprint/role-logs").is_dir());
}

#[test]
fn init_json_reports_success_and_created_directories() {
    let dir = tempfile::tempdir().unwrap();
    let value = run_json(dir.path(), &["--json", "init"]);

    assert_eq!(value["success"], true);
    assert!(value["directories_created"].as_array().unwrap().iter().any(|d| d.as_str().unwrap().contains("config.yaml")));
}

#[test]
fn init_without_force_refuses_to_clobber_an_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    sprintctl_cmd(dir.path()).arg("init").assert().success();

    let value = run_json(dir.path(), &["--json", "init"]);
    assert_eq!(value["success"], false);
    assert!(value["message"].as_str().unwrap().contains("--force"));
}

#[test]
fn init_force_reinitializes_an_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    sprintctl_cmd(dir.path()).arg("init").assert().success();

    let value = run_json(dir.path(), &["--json", "init", "--force"]);
    assert_eq!(value["success"], true);
}

#[test]
fn help_lists_every_top_level_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    sprintctl_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("sprint"));
}

#[test]
fn sprint_subcommand_help_lists_lifecycle_actions() {
    let dir = tempfile::tempdir().unwrap();
    sprintctl_cmd(dir.path())
        .args(["sprint", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("restart"))
        .stdout(predicate::str::contains("retry-task"));
}
