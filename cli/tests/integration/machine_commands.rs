//! Integration tests for commands that only touch local state.

#![allow(clippy::expect_used)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A workspace with its own config file and state directory.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let state = dir.path().join("state");
        std::fs::write(
            dir.path().join("config.yaml"),
            format!(
                "zones: [zone-a]\nstate_dir: {}\ndns:\n  base_domain: dev.example.com\n",
                state.display()
            ),
        )
        .expect("write config");
        Self { dir }
    }

    fn state(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("devmachine"));
        cmd.env("NO_COLOR", "1")
            .env("DEVMACHINE_CONFIG", self.dir.path().join("config.yaml"))
            .env_remove("DEVMACHINE_COMPUTE_TOKEN")
            .env_remove("DEVMACHINE_DNS_TOKEN")
            .env_remove("DEVMACHINE_BACKEND_TOKEN")
            .env_remove("DEVMACHINE_REPO_TOKEN");
        cmd
    }

    fn create(&self, owner: &str) -> String {
        let output = self
            .cmd()
            .args(["create", owner, "--json"])
            .output()
            .expect("run create");
        assert!(output.status.success(), "create failed: {output:?}");
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
        value["machineId"].as_str().expect("machine id").to_string()
    }
}

#[test]
fn test_list_empty_state() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No machines."));
}

#[test]
fn test_create_records_machine_and_queues_task() {
    let sandbox = Sandbox::new();

    let id = sandbox.create("Acme Corp");

    assert!(id.starts_with("m-"));
    let record = sandbox.state().join("state/machines").join(format!("{id}.json"));
    assert!(record.exists(), "record written to {}", record.display());
    let pending = std::fs::read_dir(sandbox.state().join("state/queue/pending"))
        .expect("pending dir")
        .count();
    assert_eq!(pending, 1);
}

#[test]
fn test_list_shows_created_machine() {
    let sandbox = Sandbox::new();
    sandbox.create("acme");

    sandbox
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("dm-acme"))
        .stdout(predicate::str::contains("creating_infrastructure"));
}

#[test]
fn test_status_json_reports_state() {
    let sandbox = Sandbox::new();
    let id = sandbox.create("acme");

    sandbox
        .cmd()
        .args(["status", &id, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "creating_infrastructure""#))
        .stdout(predicate::str::contains(r#""hostName": "dm-acme""#));
}

#[test]
fn test_second_create_for_owner_fails() {
    let sandbox = Sandbox::new();
    sandbox.create("acme");

    sandbox
        .cmd()
        .args(["create", "acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already has a machine"));
}

#[test]
fn test_create_with_repo_requires_token() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["create", "acme", "--repo", "https://github.com/acme/app.git"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DEVMACHINE_REPO_TOKEN"));
}

#[test]
fn test_status_unknown_machine_fails() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["status", "m-0123456789abcdef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_status_invalid_id_fails() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["status", "../etc/passwd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid machine ID"));
}

#[test]
fn test_invalid_config_is_reported() {
    let sandbox = Sandbox::new();
    std::fs::write(sandbox.state().join("config.yaml"), "zones: []\n").expect("write");

    sandbox
        .cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}
