//! Release of everything a run holds: the supervised process and the
//! external cluster state.
//!
//! Teardown is invoked unconditionally whenever a launch produced a
//! process handle, including after readiness or validation failures --
//! leaking a cluster across runs poisons every later run's port sweep and
//! row counts.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::{ClusterHandle, ClusterManager};
use crate::retry::{self, TimeoutError};
use crate::supervisor::{ExitOutcome, ManagedProcess, SupervisorError};

#[derive(Debug, Error)]
pub enum TeardownError {
    /// Stopping the supervised process failed. `ProcessNotInitialized`
    /// lands here and stays terminal: it means teardown ran against a
    /// handle that was never launched, a sequencing bug.
    #[error("failed to stop the supervised process")]
    Process(#[source] SupervisorError),

    /// `cluster delete` never succeeded within its budget.
    #[error("cluster delete did not succeed")]
    Delete(#[source] TimeoutError),
}

/// Retry shape for the delete call plus the stop grace period.
#[derive(Debug, Clone, Copy)]
pub struct TeardownPolicy {
    pub stop_grace: Duration,
    pub delete_interval: Duration,
    pub delete_budget: Duration,
}

/// Tear the run down: reap the supervised process (when a handle exists),
/// then delete the cluster and its dependencies.
///
/// A process that already exited is tolerated -- `stop` reports its real
/// outcome -- and is distinct from a termination failure, which aborts the
/// teardown. Returns the process exit outcome when a process was reaped.
pub async fn teardown(
    manager: &dyn ClusterManager,
    handle: &ClusterHandle,
    process: Option<&mut ManagedProcess>,
    policy: &TeardownPolicy,
) -> Result<Option<ExitOutcome>, TeardownError> {
    let mut reaped = None;
    if let Some(process) = process {
        let outcome = process
            .stop(policy.stop_grace)
            .await
            .map_err(TeardownError::Process)?;
        tracing::info!(
            program = process.program(),
            outcome = %outcome,
            uptime_secs = process.uptime().as_secs(),
            "supervised process reaped"
        );
        reaped = Some(outcome);
    }

    delete_cluster(manager, handle, policy).await?;
    Ok(reaped)
}

/// Delete the cluster under the bounded retry loop. The management tool
/// may transiently fail while the cluster is still draining internal
/// state, so a few failed attempts are expected.
pub async fn delete_cluster(
    manager: &dyn ClusterManager,
    handle: &ClusterHandle,
    policy: &TeardownPolicy,
) -> Result<(), TeardownError> {
    retry::with_deadline(
        "cluster delete",
        policy.delete_interval,
        policy.delete_budget,
        || manager.delete(handle, true),
    )
    .await
    .map_err(TeardownError::Delete)?;

    tracing::info!(cluster = handle.name(), "cluster deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::CtlRunner;
    use crate::supervisor::{self, LaunchSpec};
    use corral_test_utils::ScriptedCtl;

    fn quick_policy() -> TeardownPolicy {
        TeardownPolicy {
            stop_grace: Duration::from_secs(2),
            delete_interval: Duration::from_millis(50),
            delete_budget: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn unlaunched_handle_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = ScriptedCtl::new().write(tmp.path());
        let runner = CtlRunner::new(ctl);
        let handle = ClusterHandle::bare_metal("mycluster");
        let mut process = ManagedProcess::unstarted("ctl");

        let result = teardown(&runner, &handle, Some(&mut process), &quick_policy()).await;
        assert!(matches!(
            result,
            Err(TeardownError::Process(SupervisorError::ProcessNotInitialized))
        ));
    }

    #[tokio::test]
    async fn teardown_without_process_still_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
        let runner = CtlRunner::new(ctl);
        let handle = ClusterHandle::bare_metal("mycluster");

        let reaped = teardown(&runner, &handle, None, &quick_policy())
            .await
            .unwrap();
        assert!(reaped.is_none());
        assert!(corral_test_utils::delete_marker(tmp.path()).exists());
    }

    #[tokio::test]
    async fn teardown_stops_live_process_then_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = ScriptedCtl::new().delete_touches_marker().write(tmp.path());
        let runner = CtlRunner::new(ctl.clone());
        let handle = ClusterHandle::bare_metal("mycluster");

        let mut process = supervisor::launch(&LaunchSpec::new(ctl, handle.create_args()))
            .await
            .unwrap();
        assert!(process.is_running());

        let reaped = teardown(&runner, &handle, Some(&mut process), &quick_policy())
            .await
            .unwrap();
        assert_eq!(reaped, Some(ExitOutcome::Signal(libc::SIGTERM)));
        assert!(!process.is_running());
        assert!(corral_test_utils::delete_marker(tmp.path()).exists());
    }

    #[tokio::test]
    async fn transient_delete_failures_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = ScriptedCtl::new().delete_fails_times(2).write(tmp.path());
        let runner = CtlRunner::new(ctl);
        let handle = ClusterHandle::bare_metal("mycluster");

        teardown(&runner, &handle, None, &quick_policy())
            .await
            .unwrap();
        // Two failures plus the success.
        let attempts = std::fs::read_to_string(tmp.path().join("delete_attempts")).unwrap();
        assert_eq!(attempts.trim(), "3");
    }

    #[tokio::test]
    async fn persistent_delete_failure_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = ScriptedCtl::new().on_delete("exit 1").write(tmp.path());
        let runner = CtlRunner::new(ctl);
        let handle = ClusterHandle::bare_metal("mycluster");

        let policy = TeardownPolicy {
            stop_grace: Duration::from_secs(1),
            delete_interval: Duration::from_millis(50),
            delete_budget: Duration::from_millis(400),
        };
        let result = teardown(&runner, &handle, None, &policy).await;
        assert!(matches!(result, Err(TeardownError::Delete(_))));
    }
}
