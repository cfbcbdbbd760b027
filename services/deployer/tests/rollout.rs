//! End-to-end rollouts against in-memory fakes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use fleet_deployer::{
    DeployConfig, DeployError, DeployResult, Deployer, Deployment, ReleaseStatus, Strategy,
    WaitKind,
};
use fleet_id::MachineId;
use fleet_reconcile::{MachineConfig, Mount, StaticAppConfig};
use fleet_testing::fixtures::{deployment, machine, machine_with_mount, volume};
use fleet_testing::{Call, CallLog, FakeFleet, RecordingProgress};
use futures_util::FutureExt;
use tokio::sync::watch;

fn app_config() -> StaticAppConfig {
    StaticAppConfig::new("ord").with_process("web", MachineConfig::default())
}

fn config(strategy: Strategy) -> DeployConfig {
    DeployConfig {
        strategy,
        ..Default::default()
    }
}

fn id(s: &str) -> MachineId {
    MachineId::parse(s).unwrap()
}

struct Outcome {
    result: DeployResult<()>,
    log: CallLog,
    progress: Arc<RecordingProgress>,
}

async fn run(
    fleet: FakeFleet,
    app_config: StaticAppConfig,
    config: DeployConfig,
    deployment: Deployment,
) -> Outcome {
    let log = fleet.log.clone();
    let progress = Arc::clone(&fleet.progress);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let deployer = Deployer::new(config, fleet.collaborators(app_config), deployment, shutdown_rx);
    let result = deployer.run().await;

    Outcome {
        result,
        log,
        progress,
    }
}

fn web_fleet() -> Deployment {
    deployment(
        vec![machine("m1", "web"), machine("m2", "web"), machine("m3", "web")],
        vec![],
    )
}

#[tokio::test]
async fn test_rolling_deploy_waits_on_each_machine() {
    let out = run(
        FakeFleet::new(),
        app_config(),
        config(Strategy::Rolling),
        deployment(vec![machine("m1", "web"), machine("m2", "web")], vec![]),
    )
    .await;

    assert!(out.result.is_ok());
    let ids = vec![id("m1"), id("m2")];
    assert_eq!(
        out.log.calls(),
        vec![
            Call::SetStatus(ReleaseStatus::Running),
            Call::ReleaseCommand,
            Call::AcquireLeases(ids.clone()),
            Call::Update(id("m1")),
            Call::Wait(id("m1"), WaitKind::Started),
            Call::Wait(id("m1"), WaitKind::Healthy),
            Call::Update(id("m2")),
            Call::Wait(id("m2"), WaitKind::Started),
            Call::Wait(id("m2"), WaitKind::Healthy),
            Call::ReleaseLeases(ids),
            Call::SetStatus(ReleaseStatus::Complete),
        ]
    );
    assert!(out.progress.contains("[1/2] Updating m1"));
    assert!(out.progress.contains("Machine m2 update finished: success"));
}

#[tokio::test]
async fn test_immediate_continues_after_update_failure() {
    let out = run(
        FakeFleet::new().machines(|m| m.fail_update("m2")),
        app_config(),
        config(Strategy::Immediate),
        web_fleet(),
    )
    .await;

    assert!(out.result.is_ok());
    assert_eq!(out.log.updated(), ["m1", "m2", "m3"]);
    assert_eq!(out.log.count(|c| matches!(c, Call::Wait(..))), 0);
    assert_eq!(
        out.log.statuses(),
        [ReleaseStatus::Running, ReleaseStatus::Complete]
    );
    assert!(out.progress.contains("Continuing after error"));
}

#[tokio::test]
async fn test_rolling_aborts_on_update_failure() {
    let out = run(
        FakeFleet::new().machines(|m| m.fail_update("m2")),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    let err = out.result.unwrap_err();
    assert!(matches!(err, DeployError::Update { ref machine, .. } if machine.as_str() == "m2"));
    assert_eq!(out.log.updated(), ["m1", "m2"]);
    assert!(!out.log.contains(&Call::Wait(id("m2"), WaitKind::Started)));
    assert!(out
        .log
        .contains(&Call::ReleaseLeases(vec![id("m1"), id("m2"), id("m3")])));
    assert_eq!(
        out.log.statuses(),
        [ReleaseStatus::Running, ReleaseStatus::Failed]
    );
}

#[tokio::test]
async fn test_release_command_failure_takes_no_leases() {
    let out = run(
        FakeFleet::new().release_command(|r| r.failing()),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    assert!(matches!(out.result, Err(DeployError::ReleaseCommand(_))));
    assert_eq!(
        out.log.count(|c| matches!(c, Call::AcquireLeases(_) | Call::ReleaseLeases(_))),
        0
    );
    assert!(out.log.updated().is_empty());
    assert_eq!(
        out.log.statuses(),
        [ReleaseStatus::Running, ReleaseStatus::Failed]
    );
}

#[tokio::test]
async fn test_lease_acquisition_failure_aborts() {
    let out = run(
        FakeFleet::new().leases(|l| l.failing()),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    assert!(matches!(out.result, Err(DeployError::LeaseAcquisition(_))));
    assert!(out.log.updated().is_empty());
}

#[tokio::test]
async fn test_leases_released_after_wait_failure() {
    let out = run(
        FakeFleet::new().machines(|m| m.fail_wait("m1", WaitKind::Healthy)),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    let err = out.result.unwrap_err();
    assert!(matches!(
        err,
        DeployError::Wait {
            kind: WaitKind::Healthy,
            ..
        }
    ));

    let calls = out.log.calls();
    assert_eq!(
        calls[calls.len() - 2],
        Call::ReleaseLeases(vec![id("m1"), id("m2"), id("m3")])
    );
    assert_eq!(calls[calls.len() - 1], Call::SetStatus(ReleaseStatus::Failed));
}

#[tokio::test]
async fn test_running_status_failure_aborts_immediately() {
    let out = run(
        FakeFleet::new().releases(|r| r.reject(ReleaseStatus::Running)),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    assert!(matches!(out.result, Err(DeployError::ReleaseStatus(_))));
    assert_eq!(out.log.calls(), [Call::SetStatus(ReleaseStatus::Running)]);
}

#[tokio::test]
async fn test_final_status_failure_after_success_is_reported() {
    let out = run(
        FakeFleet::new().releases(|r| r.reject(ReleaseStatus::Complete)),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    assert!(matches!(out.result, Err(DeployError::FinalReleaseStatus(_))));
    assert_eq!(out.log.updated(), ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_final_status_failure_after_failed_pass_keeps_cause() {
    let out = run(
        FakeFleet::new()
            .release_command(|r| r.failing())
            .releases(|r| r.reject(ReleaseStatus::Failed)),
        app_config(),
        config(Strategy::Rolling),
        web_fleet(),
    )
    .await;

    assert!(matches!(out.result, Err(DeployError::ReleaseCommand(_))));
}

#[tokio::test]
async fn test_process_group_changes() {
    let app_config = app_config().with_process("worker", MachineConfig::default());
    let out = run(
        FakeFleet::new(),
        app_config,
        config(Strategy::Rolling),
        deployment(vec![machine("m1", "web"), machine("s1", "stale")], vec![]),
    )
    .await;

    assert!(out.result.is_ok());
    let calls = out.log.calls();
    let destroy = calls
        .iter()
        .position(|c| *c == Call::Destroy(id("s1")))
        .unwrap();
    let launch = calls
        .iter()
        .position(|c| {
            *c == Call::Launch {
                group: "worker".to_string(),
                id: id("new_1"),
            }
        })
        .unwrap();
    let update = calls.iter().position(|c| *c == Call::Update(id("m1"))).unwrap();
    assert!(destroy < launch && launch < update);

    assert!(out.log.contains(&Call::Wait(id("new_1"), WaitKind::Healthy)));
    assert_eq!(out.log.updated(), ["m1"]);
    assert!(out.progress.contains("Process groups have changed"));
    assert!(out.progress.contains("destroy 1 \"stale\" machine"));
    assert!(out.progress.contains("create 1 \"worker\" machine"));
    assert!(out.progress.contains("Finished launching new machines"));
}

#[tokio::test]
async fn test_destroy_failure_aborts_before_launch() {
    let app_config = app_config().with_process("worker", MachineConfig::default());
    let out = run(
        FakeFleet::new().machines(|m| m.fail_destroy("s1")),
        app_config,
        config(Strategy::Immediate),
        deployment(vec![machine("m1", "web"), machine("s1", "stale")], vec![]),
    )
    .await;

    assert!(matches!(
        out.result,
        Err(DeployError::Destroy { ref machine, .. }) if machine.as_str() == "s1"
    ));
    assert_eq!(out.log.count(|c| matches!(c, Call::Launch { .. })), 0);
    assert!(out.log.updated().is_empty());
}

#[tokio::test]
async fn test_create_failure_hints_at_release_command_machine() {
    let app_config = app_config().with_process("worker", MachineConfig::default());
    let out = run(
        FakeFleet::new()
            .release_command(|r| r.with_machine())
            .machines(|m| m.fail_launch("worker", "limit reached, please add a payment method")),
        app_config.clone(),
        config(Strategy::Immediate),
        deployment(vec![machine("m1", "web")], vec![]),
    )
    .await;

    match out.result {
        Err(DeployError::Create { group, hint, .. }) => {
            assert_eq!(group, "worker");
            assert!(hint.is_some_and(|h| h.contains("release commands")));
        }
        other => panic!("expected create error, got {other:?}"),
    }
    assert!(out.log.updated().is_empty());

    let out = run(
        FakeFleet::new().machines(|m| m.fail_launch("worker", "please add a payment method")),
        app_config,
        config(Strategy::Rolling),
        deployment(vec![machine("m1", "web")], vec![]),
    )
    .await;
    assert!(matches!(out.result, Err(DeployError::Create { hint: None, .. })));
}

#[tokio::test]
async fn test_immediate_does_not_wait_on_new_groups() {
    let app_config = app_config().with_process("worker", MachineConfig::default());
    let out = run(
        FakeFleet::new(),
        app_config,
        config(Strategy::Immediate),
        deployment(vec![machine("m1", "web")], vec![]),
    )
    .await;

    assert!(out.result.is_ok());
    assert_eq!(out.log.count(|c| matches!(c, Call::Launch { .. })), 1);
    assert_eq!(out.log.count(|c| matches!(c, Call::Wait(..))), 0);
}

fn db_config(volume_name: &str, path: &str) -> StaticAppConfig {
    StaticAppConfig::new("ord").with_process(
        "db",
        MachineConfig {
            mount: Some(Mount::new(volume_name, path)),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_volume_swap_replaces_machine() {
    let out = run(
        FakeFleet::new(),
        db_config("pg_new", "/data"),
        config(Strategy::Rolling),
        deployment(
            vec![machine_with_mount("m1", "db", "pg_old", "/data", "vol_old")],
            vec![volume("vol_new", "pg_new")],
        ),
    )
    .await;

    assert!(out.result.is_ok());
    let calls = out.log.calls();
    let destroy = calls
        .iter()
        .position(|c| *c == Call::Destroy(id("m1")))
        .unwrap();
    assert_eq!(
        calls[destroy + 1],
        Call::Launch {
            group: "db".to_string(),
            id: id("new_1"),
        }
    );
    assert_eq!(calls[destroy + 2], Call::Wait(id("new_1"), WaitKind::Started));
    assert!(out.log.updated().is_empty());
    assert!(out.progress.contains("Replacing m1 by new machine"));
    assert!(out.progress.contains("WARNING"));
}

#[tokio::test]
async fn test_mount_path_change_updates_in_place() {
    let out = run(
        FakeFleet::new(),
        db_config("v1", "/newdata"),
        config(Strategy::Rolling),
        deployment(
            vec![machine_with_mount("m1", "db", "v1", "/data", "vol_a")],
            vec![],
        ),
    )
    .await;

    assert!(out.result.is_ok());
    assert_eq!(out.log.updated(), ["m1"]);
    assert_eq!(out.log.count(|c| matches!(c, Call::Destroy(_))), 0);
    assert!(out.progress.contains("/newdata"));
}

#[tokio::test]
async fn test_immediate_replace_skips_launch_after_destroy_failure() {
    let out = run(
        FakeFleet::new().machines(|m| m.fail_destroy("m1")),
        db_config("pg_new", "/data"),
        config(Strategy::Immediate),
        deployment(
            vec![
                machine_with_mount("m1", "db", "pg_old", "/data", "vol_old"),
                machine("m2", "db"),
            ],
            vec![volume("vol_new", "pg_new"), volume("vol_other", "pg_new")],
        ),
    )
    .await;

    assert!(out.result.is_ok());
    // m2 gains a mount and is replaced too; only its replacement is launched.
    assert_eq!(out.log.count(|c| matches!(c, Call::Launch { .. })), 1);
    assert!(out.log.contains(&Call::Destroy(id("m2"))));
}

#[tokio::test]
async fn test_missing_volume_aborts_before_any_update() {
    let out = run(
        FakeFleet::new(),
        db_config("pg_data", "/data"),
        config(Strategy::Immediate),
        deployment(vec![machine("m1", "db"), machine("m2", "db")], vec![]),
    )
    .await;

    let err = out.result.unwrap_err();
    assert!(err
        .build_error()
        .is_some_and(|e| e.is_volume_unavailable()));
    assert!(out.log.updated().is_empty());
    assert!(out
        .log
        .contains(&Call::ReleaseLeases(vec![id("m1"), id("m2")])));
}

#[tokio::test]
async fn test_restart_only_touches_every_machine() {
    let out = run(
        FakeFleet::new(),
        app_config(),
        DeployConfig {
            restart_only: true,
            ..config(Strategy::Rolling)
        },
        deployment(vec![machine("m1", "web"), machine("s1", "stale")], vec![]),
    )
    .await;

    assert!(out.result.is_ok());
    assert_eq!(out.log.updated(), ["m1", "s1"]);
    assert!(!out.log.contains(&Call::ReleaseCommand));
    assert_eq!(
        out.log
            .count(|c| matches!(c, Call::Destroy(_) | Call::Launch { .. })),
        0
    );
    assert!(out
        .log
        .contains(&Call::ReleaseLeases(vec![id("m1"), id("s1")])));
}

#[tokio::test]
async fn test_skip_health_checks() {
    let out = run(
        FakeFleet::new(),
        app_config(),
        DeployConfig {
            skip_health_checks: true,
            ..config(Strategy::Rolling)
        },
        web_fleet(),
    )
    .await;

    assert!(out.result.is_ok());
    assert_eq!(
        out.log
            .count(|c| matches!(c, Call::Wait(_, WaitKind::Started))),
        3
    );
    assert_eq!(
        out.log
            .count(|c| matches!(c, Call::Wait(_, WaitKind::Healthy))),
        0
    );
}

#[tokio::test]
async fn test_cancellation_during_wait_releases_leases() {
    let fleet = FakeFleet::new().machines(|m| m.hang_waits());
    let log = fleet.log.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let deployer = Deployer::new(
        config(Strategy::Rolling),
        fleet.collaborators(app_config()),
        web_fleet(),
        shutdown_rx,
    );

    let (result, _) = tokio::join!(deployer.run(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
    });

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(log.updated(), ["m1"]);
    assert!(log.contains(&Call::ReleaseLeases(vec![id("m1"), id("m2"), id("m3")])));
    assert_eq!(
        log.statuses(),
        [ReleaseStatus::Running, ReleaseStatus::Failed]
    );
}

#[tokio::test]
async fn test_cancellation_with_hung_renewal_releases_leases() {
    let fleet = FakeFleet::new()
        .machines(|m| m.hang_waits())
        .leases(|l| l.hang_renewals());
    let log = fleet.log.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let deployer = Deployer::new(
        DeployConfig {
            lease_ttl: Duration::from_secs(1),
            lease_renew_interval: Duration::from_millis(10),
            ..config(Strategy::Rolling)
        },
        fleet.collaborators(app_config()),
        web_fleet(),
        shutdown_rx,
    );

    let rollout = async {
        let (result, _) = tokio::join!(deployer.run(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown_tx.send(true).unwrap();
        });
        result
    };
    let result = tokio::time::timeout(Duration::from_secs(2), rollout)
        .await
        .expect("rollout hung on lease renewal");

    assert!(result.unwrap_err().is_cancelled());
    assert!(log.count(|c| matches!(c, Call::AcquireLeases(_))) >= 2);
    assert!(log.contains(&Call::ReleaseLeases(vec![id("m1"), id("m2"), id("m3")])));
    assert_eq!(
        log.statuses(),
        [ReleaseStatus::Running, ReleaseStatus::Failed]
    );
}

#[tokio::test]
async fn test_panic_in_pass_releases_leases() {
    let fleet = FakeFleet::new().machines(|m| m.panic_on_update("m2"));
    let log = fleet.log.clone();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let deployer = Deployer::new(
        config(Strategy::Rolling),
        fleet.collaborators(app_config()),
        web_fleet(),
        shutdown_rx,
    );

    let outcome = AssertUnwindSafe(deployer.run()).catch_unwind().await;

    assert!(outcome.is_err());
    assert_eq!(log.updated(), ["m1", "m2"]);
    assert_eq!(
        log.calls().last(),
        Some(&Call::ReleaseLeases(vec![id("m1"), id("m2"), id("m3")]))
    );
    assert_eq!(log.statuses(), [ReleaseStatus::Running]);
}
