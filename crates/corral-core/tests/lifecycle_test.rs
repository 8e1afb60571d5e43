//! End-to-end tests of the lifecycle against a scripted fake
//! cluster-manager binary.
//!
//! A local TCP listener stands in for the cluster's frontend, so the full
//! chain (launch -> readiness -> get -> teardown) runs for real; the SQL
//! endpoint points at a closed port, which also exercises the
//! teardown-after-validation-failure contract.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use corral_core::cluster::{ClusterHandle, ClusterManager, CtlRunner};
use corral_core::config::{HarnessConfig, SqlEndpoint, Timeouts};
use corral_core::lifecycle::{self, HarnessError};
use corral_core::readiness;
use corral_core::retry;
use corral_core::supervisor::{self, ExitOutcome, LaunchSpec};
use corral_core::teardown::{self, TeardownPolicy};
use corral_core::validate::ValidationError;

use corral_test_utils::{ScriptedCtl, delete_marker, ephemeral_listener, free_port};

fn test_config(ctl: &std::path::Path, frontend_port: u16) -> HarnessConfig {
    HarnessConfig {
        cluster_name: "itest".to_string(),
        ctl_binary: ctl.to_path_buf(),
        host: "127.0.0.1".to_string(),
        // The port sweep is covered by the ports module tests; an empty
        // set keeps these tests independent of lsof being installed.
        ports: vec![],
        frontend_port,
        sql: SqlEndpoint {
            host: "127.0.0.1".to_string(),
            port: free_port(),
            user: String::new(),
            password: String::new(),
        },
        frontend_log: None,
        batch_size: 10,
        launch_deadline_secs: None,
        timeouts: Timeouts {
            readiness_secs: 10,
            probe_secs: 2,
            get_interval_secs: 1,
            get_budget_secs: 10,
            connect_interval_secs: 1,
            connect_budget_secs: 1,
            delete_interval_secs: 1,
            delete_budget_secs: 10,
            stop_grace_secs: 2,
        },
    }
}

#[tokio::test]
async fn full_cycle_against_fake_ctl() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = ScriptedCtl::new().delete_fails_times(1).write(tmp.path());
    let runner = CtlRunner::new(&ctl);
    let handle = ClusterHandle::unique("itest");

    // A local listener stands in for the cluster frontend.
    let (listener, port) = ephemeral_listener().await;

    // Launch. The handle exists before any polling starts.
    let mut process = supervisor::launch(&LaunchSpec::new(&ctl, handle.create_args()))
        .await
        .unwrap();
    assert!(process.is_running());

    // Readiness gate.
    readiness::await_reachable(
        &format!("127.0.0.1:{port}"),
        Duration::from_secs(2),
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    // Management-plane visibility under a bounded poll.
    retry::with_deadline(
        "cluster get",
        Duration::from_millis(50),
        Duration::from_secs(5),
        || runner.get(&handle),
    )
    .await
    .unwrap();

    // Teardown: reap the process, then delete (first delete attempt fails).
    let policy = TeardownPolicy {
        stop_grace: Duration::from_secs(2),
        delete_interval: Duration::from_millis(50),
        delete_budget: Duration::from_secs(5),
    };
    let reaped = teardown::teardown(&runner, &handle, Some(&mut process), &policy)
        .await
        .unwrap();

    assert!(matches!(reaped, Some(ExitOutcome::Signal(_))));
    assert!(!process.is_running(), "process handle must report exited");

    let attempts = std::fs::read_to_string(tmp.path().join("delete_attempts")).unwrap();
    assert_eq!(attempts.trim(), "2", "one transient failure plus the success");

    drop(listener);
}

#[tokio::test]
async fn run_tears_down_after_validation_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
    let (listener, port) = ephemeral_listener().await;

    let log_path = tmp.path().join("frontend.log");
    std::fs::write(&log_path, "frontend started\n").unwrap();

    let mut config = test_config(&ctl, port);
    config.frontend_log = Some(log_path);

    let manager = CtlRunner::new(&ctl);
    let err = lifecycle::run(&config, &manager, CancellationToken::new())
        .await
        .unwrap_err();

    // The SQL endpoint is a closed port, so validation fails at connect...
    match err {
        HarnessError::Validation(ValidationError::Connect(_)) => {}
        other => panic!("expected Validation(Connect), got {other:?}"),
    }
    // ...and teardown still ran.
    assert!(
        delete_marker(tmp.path()).exists(),
        "teardown must run after a validation failure"
    );

    drop(listener);
}

#[tokio::test]
async fn bounded_run_reaps_child_and_still_deletes() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
    let (listener, port) = ephemeral_listener().await;

    let mut config = test_config(&ctl, port);
    config.launch_deadline_secs = Some(3600);

    let manager = CtlRunner::new(&ctl);
    let err = lifecycle::run(&config, &manager, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Validation(_)));
    assert!(delete_marker(tmp.path()).exists());

    drop(listener);
}

#[tokio::test]
async fn launch_failure_skips_teardown() {
    let tmp = tempfile::tempdir().unwrap();
    // Real delete marker script, but a bogus binary path for the launch.
    let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
    let (listener, port) = ephemeral_listener().await;

    let mut config = test_config(&ctl, port);
    config.ctl_binary = "/nonexistent/path/to/ctl".into();

    let manager = CtlRunner::new(&ctl);
    let err = lifecycle::run(&config, &manager, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Launch(_)));
    assert!(
        !delete_marker(tmp.path()).exists(),
        "no process handle exists, so teardown must not run"
    );

    drop(listener);
}

#[tokio::test]
async fn cancellation_aborts_phases_but_tears_down() {
    let tmp = tempfile::tempdir().unwrap();
    let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
    let (listener, port) = ephemeral_listener().await;

    let config = test_config(&ctl, port);
    let manager = CtlRunner::new(&ctl);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = lifecycle::run(&config, &manager, cancel).await.unwrap_err();
    assert!(matches!(err, HarnessError::Cancelled));
    assert!(delete_marker(tmp.path()).exists());

    drop(listener);
}
