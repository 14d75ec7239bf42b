//! Deletion: independent best-effort release of DNS, compute, and backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use devmachine_cli::application::services::machine::{
    STEP_DELETE_BACKEND, STEP_DELETE_COMPUTE, STEP_DELETE_DNS,
};
use devmachine_common::MachineState;

use super::helpers::{orchestrator, repo, running_machine, stored, suspended_machine, take_task};

#[tokio::test]
async fn delete_releases_everything_and_forgets_machine() {
    let orch = orchestrator();
    let id = running_machine(&orch, "acme", Some(repo())).await;

    let report = orch.delete(&id).await.unwrap();

    assert!(report.is_clean());
    for step in [STEP_DELETE_DNS, STEP_DELETE_COMPUTE, STEP_DELETE_BACKEND] {
        assert!(report.attempted(step), "{step} attempted");
    }
    assert!(orch.providers().dns.records.borrow().is_empty());
    assert!(orch.providers().compute.instances.borrow().is_empty());
    assert!(orch.providers().backend.projects.borrow().is_empty());
    assert!(orch.store().machines.borrow().is_empty());
}

#[tokio::test]
async fn dns_failure_does_not_stop_other_deletions() {
    let orch = orchestrator();
    let id = running_machine(&orch, "acme", Some(repo())).await;
    orch.providers().dns.fail_delete.set(true);

    let report = orch.delete(&id).await.unwrap();

    let failed: Vec<_> = report.failures().map(|s| s.step.clone()).collect();
    assert_eq!(failed, vec![STEP_DELETE_DNS]);
    assert!(orch.providers().compute.instances.borrow().is_empty());
    assert!(orch.providers().backend.projects.borrow().is_empty());
    assert!(orch.store().machines.borrow().is_empty(), "record removed despite leak");
}

#[tokio::test]
async fn already_released_resources_count_as_deleted() {
    let orch = orchestrator();
    let id = suspended_machine(&orch, "acme").await;
    orch.providers().compute.instances.borrow_mut().clear();
    orch.providers().dns.records.borrow_mut().clear();

    let report = orch.delete(&id).await.unwrap();

    assert!(report.is_clean());
}

#[tokio::test]
async fn machine_without_resources_skips_every_deletion() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    let report = orch.delete(&id).await.unwrap();

    assert!(report.is_clean());
    assert!(!report.attempted(STEP_DELETE_DNS));
    assert!(!report.attempted(STEP_DELETE_COMPUTE));
    assert!(!report.attempted(STEP_DELETE_BACKEND));
    assert!(orch.providers().journal.borrow().is_empty());
}

#[tokio::test]
async fn failed_machine_can_be_deleted() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("apt-get update");
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);
    assert!(orch.provision_infrastructure(&id, None).await.is_err());
    assert_eq!(stored(&orch, &id).state, MachineState::Failed);

    let result = orch.delete_machine(&id).await;

    assert!(result.success);
    assert!(orch.store().machines.borrow().is_empty());
}

#[tokio::test]
async fn delete_machine_reports_unknown_and_invalid_ids() {
    let orch = orchestrator();

    let unknown = orch.delete_machine("m-0123456789abcdef").await;
    assert!(!unknown.success);
    assert!(unknown.error.unwrap().contains("not found"));

    let invalid = orch.delete_machine("acme").await;
    assert!(!invalid.success);
    assert!(invalid.error.unwrap().contains("Invalid machine ID"));
}

#[tokio::test]
async fn owner_can_recreate_after_delete() {
    let orch = orchestrator();
    let id = running_machine(&orch, "acme", None).await;
    assert!(orch.delete_machine(&id).await.success);

    let again = orch.create_machine("acme", None).await;

    assert!(again.success);
    assert_ne!(again.machine_id.unwrap(), id);
}
