//! Creation pipeline: create_machine, Phase A, Phase B, and failure teardown.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use devmachine_cli::domain::{MachineError, ProvisionError, TaskKind};
use devmachine_common::{AppRuntime, MachineHealth, MachineState, RepoInfo};

use super::helpers::{
    ZONES, orchestrator, orchestrator_with, repo, running_machine, stored, take_task, test_config,
};

// ── create_machine ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_persists_record_before_queueing_phase_a() {
    let orch = orchestrator();

    let result = orch.create_machine("Acme Corp", Some(repo())).await;

    assert!(result.success, "{:?}", result.error);
    let id = result.machine_id.expect("machine id");
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::CreatingInfrastructure);
    assert_eq!(machine.host_name, "dm-acme-corp");
    assert!(machine.zone.is_none() && machine.ip_address.is_none());
    assert_eq!(orch.queue().kinds(), vec!["provision_infrastructure"]);
    assert!(orch.providers().journal.borrow().is_empty(), "no provider calls on create");
}

#[tokio::test]
async fn second_machine_for_same_owner_rejected() {
    let orch = orchestrator();
    assert!(orch.create_machine("acme", None).await.success);

    let second = orch.create_machine("acme", None).await;

    assert!(!second.success);
    assert!(second.error.unwrap().contains("already has a machine"));
    assert_eq!(orch.store().machines.borrow().len(), 1);
}

#[tokio::test]
async fn non_https_repository_rejected_without_record() {
    let orch = orchestrator();
    let repo = RepoInfo {
        clone_url: "git@github.com:acme/app.git".to_string(),
        access_token: "t".to_string(),
    };

    let result = orch.create_machine("acme", Some(repo)).await;

    assert!(!result.success);
    assert!(orch.store().machines.borrow().is_empty());
    assert!(orch.queue().pending.borrow().is_empty());
}

#[tokio::test]
async fn unqueued_machine_is_removed() {
    let orch = orchestrator();
    orch.queue().fail_enqueue.set(true);

    let result = orch.create_machine("acme", None).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("enqueueing"));
    assert!(orch.store().machines.borrow().is_empty());
}

// ── Phase A ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn phase_a_persists_zone_ip_domain_and_queues_phase_b() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", Some(repo())).await.machine_id.unwrap();
    let TaskKind::ProvisionInfrastructure { repo } = take_task(&orch, &id).kind else {
        panic!("expected phase A task");
    };

    orch.provision_infrastructure(&id, repo).await.unwrap();

    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::InfrastructureReady);
    assert_eq!(machine.zone.as_deref(), Some(ZONES[0]));
    assert_eq!(machine.ip_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(machine.domain.as_deref(), Some("acme.dev.example.com"));
    assert_eq!(
        orch.providers().dns.records.borrow().get("acme").map(String::as_str),
        Some("10.0.0.1")
    );

    let next = take_task(&orch, &id);
    let TaskKind::SetupApplication { repo } = next.kind else {
        panic!("expected phase B task");
    };
    assert_eq!(repo, Some(super::helpers::repo()), "repo travels with the task");
    assert_eq!(orch.providers().shell().open_sessions.get(), 0);
}

#[tokio::test]
async fn system_bootstrap_runs_every_step_on_new_host() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    let shell = orch.providers().shell();
    assert!(shell.ran("apt-get update"));
    assert!(shell.ran("pm2 startup"));
    assert!(shell.ran("@anthropic-ai/claude-code"));
    assert!(shell.commands.borrow().iter().all(|(ip, _)| ip == "10.0.0.1"));
}

#[tokio::test]
async fn optional_system_step_failure_tolerated() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("@anthropic-ai/claude-code");
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(stored(&orch, &id).state, MachineState::InfrastructureReady);
}

#[tokio::test]
async fn failed_zone_falls_over_to_next_and_is_cleaned() {
    let orch = orchestrator();
    orch.providers().compute.failing_zones.borrow_mut().insert(ZONES[0].to_string());
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(stored(&orch, &id).zone.as_deref(), Some(ZONES[1]));
    assert_eq!(
        orch.providers().calls("compute."),
        vec![
            "compute.create dm-acme zone-a",
            "compute.delete dm-acme zone-a",
            "compute.create dm-acme zone-b",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hung_zone_times_out_and_falls_over() {
    let orch = orchestrator();
    orch.providers().compute.hanging_zones.borrow_mut().insert(ZONES[0].to_string());
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(stored(&orch, &id).zone.as_deref(), Some(ZONES[1]));
}

#[tokio::test]
async fn all_zones_exhausted_fails_machine() {
    let orch = orchestrator();
    for zone in ZONES {
        orch.providers().compute.failing_zones.borrow_mut().insert(zone.to_string());
    }
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    let err = orch.provision_infrastructure(&id, None).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::NoZoneAvailable { .. })
    ));
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(machine.last_error.unwrap().contains("zone-a, zone-b, zone-c"));
    assert!(orch.providers().calls("dns.").is_empty());
    assert!(orch.queue().pending.borrow().is_empty(), "phase B never queued");
}

#[tokio::test]
async fn connect_retries_until_host_accepts() {
    let orch = orchestrator();
    orch.providers()
        .shell()
        .refusals
        .borrow_mut()
        .insert("10.0.0.1".to_string(), 2);
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(orch.providers().shell().connects.get(), 3);
}

#[tokio::test]
async fn unreachable_host_fails_and_releases_instance() {
    let orch = orchestrator();
    orch.providers()
        .shell()
        .unreachable
        .borrow_mut()
        .insert("10.0.0.1".to_string());
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    let err = orch.provision_infrastructure(&id, None).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::Unreachable { attempts: 3, .. })
    ));
    assert_eq!(orch.providers().shell().connects.get(), 3);
    assert_eq!(stored(&orch, &id).state, MachineState::Failed);
    assert!(!orch.providers().compute.running("dm-acme"));
    assert_eq!(orch.providers().calls("compute.delete"), vec!["compute.delete dm-acme zone-a"]);
    assert!(orch.providers().calls("dns.").is_empty(), "no domain was ever set");
}

#[tokio::test]
async fn required_bootstrap_failure_fails_and_tears_down() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("apt-get update");
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    let err = orch.provision_infrastructure(&id, None).await.unwrap_err();

    assert!(format!("{err:#}").contains("apt-packages"));
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(machine.last_error.unwrap().contains("apt-packages"));
    assert!(orch.providers().compute.instances.borrow().is_empty());
    assert_eq!(orch.providers().shell().open_sessions.get(), 0);
}

#[tokio::test]
async fn dns_failure_in_phase_a_fails_machine() {
    let orch = orchestrator();
    orch.providers().dns.fail_create.set(true);
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    assert!(orch.provision_infrastructure(&id, None).await.is_err());

    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(machine.domain.is_none());
    assert!(orch.providers().compute.instances.borrow().is_empty());
}

#[tokio::test]
async fn cleanup_failure_is_appended_to_last_error() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("apt-get update");
    orch.providers().compute.fail_delete.set(true);
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);

    assert!(orch.provision_infrastructure(&id, None).await.is_err());

    let error = stored(&orch, &id).last_error.unwrap();
    assert!(error.contains("cleanup failed: delete-compute"), "{error}");
}

#[tokio::test]
async fn redelivered_phase_a_after_ready_only_requeues_phase_b() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, None).await.unwrap();
    take_task(&orch, &id);

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(orch.providers().calls("compute.create").len(), 1);
    assert_eq!(orch.queue().kinds(), vec!["setup_application"]);
}

#[tokio::test]
async fn interrupted_phase_a_removes_stale_instance_first() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);
    // Simulate a crash after the zone was persisted.
    {
        let mut machines = orch.store().machines.borrow_mut();
        let machine = machines.get_mut(&id).unwrap();
        machine.zone = Some(ZONES[2].to_string());
    }
    orch.providers()
        .compute
        .instances
        .borrow_mut()
        .insert("dm-acme".to_string(), (ZONES[2].to_string(), true));

    orch.provision_infrastructure(&id, None).await.unwrap();

    assert_eq!(
        orch.providers().calls("compute."),
        vec!["compute.delete dm-acme zone-c", "compute.create dm-acme zone-a"]
    );
    assert_eq!(stored(&orch, &id).zone.as_deref(), Some(ZONES[0]));
}

#[tokio::test]
async fn phase_a_rejects_machine_in_other_state() {
    let orch = orchestrator();
    let id = running_machine(&orch, "acme", None).await;
    let before = orch.providers().journal.borrow().len();

    let err = orch.provision_infrastructure(&id, None).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<MachineError>(),
        Some(MachineError::UnexpectedState { .. })
    ));
    assert_eq!(orch.providers().journal.borrow().len(), before);
    assert_eq!(stored(&orch, &id).state, MachineState::Running);
}

// ── Phase B ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn phase_b_with_repository_reaches_running() {
    let orch = orchestrator();

    let id = running_machine(&orch, "acme", Some(repo())).await;

    let machine = stored(&orch, &id);
    assert_eq!(machine.health, MachineHealth::Healthy);
    assert!(machine.last_error.is_none());
    let runtime = machine.app_runtime.expect("backend project recorded");
    assert_eq!(runtime.backend_project_id, "p-1");

    let published: Vec<_> = orch
        .providers()
        .backend
        .environment
        .borrow()
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(published, vec!["JWT_PRIVATE_KEY", "JWKS", "SITE_URL"]);
    assert!(
        orch.providers()
            .backend
            .environment
            .borrow()
            .contains(&("SITE_URL".to_string(), "https://acme.dev.example.com".to_string()))
    );

    let shell = orch.providers().shell();
    assert!(shell.ran("git clone"));
    assert!(shell.ran("pm2 startOrReload"));
    assert!(shell.ran("sites-available/acme.dev.example.com"));
    assert_eq!(orch.providers().calls("cert."), vec!["cert.issue acme.dev.example.com"]);
    assert_eq!(shell.open_sessions.get(), 0);
}

#[tokio::test]
async fn clone_runs_before_backend_creation() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("git clone");
    let id = orch.create_machine("acme", Some(repo())).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, Some(repo())).await.unwrap();
    take_task(&orch, &id);

    let err = orch.setup_application(&id, Some(repo())).await.unwrap_err();

    assert!(!format!("{err:#}").contains("ghs_secret"), "token must not leak");
    assert!(orch.providers().calls("backend.").is_empty());
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(!machine.last_error.unwrap().contains("ghs_secret"));
}

#[tokio::test]
async fn phase_b_without_repository_skips_application() {
    let orch = orchestrator();

    let id = running_machine(&orch, "acme", None).await;

    let machine = stored(&orch, &id);
    assert!(machine.app_runtime.is_none());
    assert_eq!(machine.health, MachineHealth::Healthy);
    assert!(orch.providers().calls("backend.").is_empty());
    assert!(!orch.providers().shell().ran("git clone"));
    assert_eq!(orch.providers().calls("cert.").len(), 1, "proxy still configured");
}

#[tokio::test]
async fn backend_failure_fails_and_releases_dns_and_compute() {
    let orch = orchestrator();
    orch.providers().backend.fail_create.set(true);
    let id = orch.create_machine("acme", Some(repo())).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, Some(repo())).await.unwrap();
    take_task(&orch, &id);

    let err = orch.setup_application(&id, Some(repo())).await.unwrap_err();

    assert!(format!("{err:#}").contains("project quota exceeded"));
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(orch.providers().dns.records.borrow().is_empty());
    assert!(orch.providers().compute.instances.borrow().is_empty());
    assert!(orch.providers().calls("backend.delete").is_empty());
}

#[tokio::test]
async fn failure_after_backend_creation_deletes_project() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("pm2 startOrReload");
    let id = orch.create_machine("acme", Some(repo())).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, Some(repo())).await.unwrap();
    take_task(&orch, &id);

    assert!(orch.setup_application(&id, Some(repo())).await.is_err());

    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Failed);
    assert!(machine.app_runtime.is_some(), "record keeps what was released");
    assert_eq!(orch.providers().calls("backend.delete"), vec!["backend.delete p-1"]);
    assert!(orch.providers().backend.projects.borrow().is_empty());
}

#[tokio::test]
async fn auth_key_failure_leaves_machine_running_degraded() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("generateKeyPairSync");

    let id = running_machine(&orch, "acme", Some(repo())).await;

    let machine = stored(&orch, &id);
    assert!(machine.health.is_degraded());
    assert!(machine.last_error.unwrap().contains("auth-keygen"));
    let published: Vec<_> = orch
        .providers()
        .backend
        .environment
        .borrow()
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(published, vec!["SITE_URL"], "keys skipped, site url still published");
}

#[tokio::test]
async fn certificate_failure_serves_plain_http() {
    let orch = orchestrator();
    orch.providers().certificates.fail.set(true);

    let id = running_machine(&orch, "acme", Some(repo())).await;

    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Running);
    assert!(machine.last_error.unwrap().contains("certificate"));
    assert!(orch.providers().shell().ran("sites-available/acme.dev.example.com"));
    assert!(
        orch.providers()
            .backend
            .environment
            .borrow()
            .contains(&("SITE_URL".to_string(), "http://acme.dev.example.com".to_string())),
        "site url matches the plain http proxy"
    );
    let commands = orch.providers().shell().commands.borrow();
    let (_, runtime_config) = commands
        .iter()
        .find(|(_, c)| c.contains(".env.local"))
        .expect("runtime config written");
    let encoded = runtime_config.split_whitespace().nth(1).unwrap();
    let env = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
    assert!(env.contains("SITE_URL=http://acme.dev.example.com\n"), "{env}");
}

#[tokio::test]
async fn proxy_failure_fails_phase_b() {
    let orch = orchestrator();
    orch.providers().shell().fail_commands_containing("sites-available");
    let id = orch.create_machine("acme", None).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, None).await.unwrap();
    take_task(&orch, &id);

    assert!(orch.setup_application(&id, None).await.is_err());
    assert_eq!(stored(&orch, &id).state, MachineState::Failed);
}

#[tokio::test]
async fn interrupted_phase_b_reuses_backend_project() {
    let orch = orchestrator();
    let id = orch.create_machine("acme", Some(repo())).await.machine_id.unwrap();
    take_task(&orch, &id);
    orch.provision_infrastructure(&id, Some(repo())).await.unwrap();
    take_task(&orch, &id);
    // A first attempt created the project, then the worker died mid-phase.
    let runtime = AppRuntime {
        backend_project_url: "https://dm-acme.backend.test".to_string(),
        backend_project_id: "p-earlier".to_string(),
        backend_deploy_credential: "dev:earlier".to_string(),
    };
    orch.providers()
        .backend
        .projects
        .borrow_mut()
        .insert("p-earlier".to_string(), runtime.backend_project_url.clone());
    {
        let mut machines = orch.store().machines.borrow_mut();
        let machine = machines.get_mut(&id).unwrap();
        machine.state = MachineState::SettingUpApplication;
        machine.app_runtime = Some(runtime);
    }

    orch.setup_application(&id, Some(repo())).await.unwrap();

    assert!(orch.providers().calls("backend.create").is_empty());
    let machine = stored(&orch, &id);
    assert_eq!(machine.state, MachineState::Running);
    assert_eq!(machine.app_runtime.unwrap().backend_project_id, "p-earlier");
}

#[tokio::test]
async fn running_machine_satisfies_invariants() {
    let orch = orchestrator_with(test_config());
    let id = running_machine(&orch, "acme", Some(repo())).await;
    let machine = stored(&orch, &id);

    devmachine_cli::domain::check_invariants(&machine, true).unwrap();
    assert!(machine.updated_at >= machine.created_at);
}
