//! Orchestrators in separate processes share one state directory.
//!
//! Each orchestrator here owns its own `FileMachineStore`, as two
//! `devmachine` invocations would.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use devmachine_cli::application::ports::MachineStore;
use devmachine_cli::application::services::Orchestrator;
use devmachine_cli::infra::store::FileMachineStore;
use devmachine_common::Machine;

use super::helpers::{FakeCloud, MemoryQueue, test_config};

type FileOrchestrator = Orchestrator<FakeCloud, FileMachineStore, MemoryQueue>;

const BLOCKED_FOR: Duration = Duration::from_millis(300);

fn file_orchestrator(state_dir: &Path) -> FileOrchestrator {
    Orchestrator::new(
        FakeCloud::default(),
        FileMachineStore::new(state_dir),
        MemoryQueue::default(),
        test_config(),
    )
}

#[tokio::test]
async fn delete_waits_for_machine_locked_elsewhere() {
    let dir = tempfile::tempdir().unwrap();
    let orch = file_orchestrator(dir.path());
    let id = "m-00000000000000aa";
    let machine = Machine::new(id.to_string(), "acme".to_string(), "dm-acme".to_string());
    orch.store().save(&machine).await.unwrap();

    let elsewhere = FileMachineStore::new(dir.path());
    let held = elsewhere.lock(id).await.unwrap();

    let blocked = tokio::time::timeout(BLOCKED_FOR, orch.delete(id)).await;
    assert!(blocked.is_err(), "delete ran while another process held the machine");
    assert!(elsewhere.load(id).await.unwrap().is_some());

    drop(held);
    orch.delete(id).await.unwrap();
    assert!(elsewhere.load(id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_creates_for_one_owner_yield_one_machine() {
    let dir = tempfile::tempdir().unwrap();
    let first = file_orchestrator(dir.path());
    let second = file_orchestrator(dir.path());

    let (a, b) = tokio::join!(
        first.create_machine("acme", None),
        second.create_machine("acme", None),
    );

    assert_eq!(
        u8::from(a.success) + u8::from(b.success),
        1,
        "exactly one create wins: {a:?} / {b:?}"
    );
    let machines = FileMachineStore::new(dir.path()).list().await.unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].owner_ref, "acme");
}
