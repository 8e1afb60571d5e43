//! The run driver: reconcile ports, launch the cluster, gate on readiness,
//! confirm management-plane visibility, prove the data plane, tear down.
//!
//! Phase ordering is enforced by construction: the process handle exists
//! before readiness polling begins (detached launch returns it; bounded
//! launch hands the pid over a oneshot promise), readiness gates
//! validation, and validation completes -- success or failure -- before the
//! delete call. Teardown runs whenever a launch produced a handle, even if
//! a later phase failed.

use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterHandle, ClusterManager};
use crate::config::HarnessConfig;
use crate::ports::{self, ReconcileError};
use crate::readiness;
use crate::retry::{self, TimeoutError};
use crate::supervisor::{self, BoundedExit, ExitOutcome, LaunchSpec, SupervisorError};
use crate::teardown::{self, TeardownError, TeardownPolicy};
use crate::validate::{self, ConnectPolicy, ValidationError};

/// A run failure, tagged with the phase that produced it.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("port reconciliation failed")]
    Reconcile(#[source] ReconcileError),

    #[error("cluster launch failed")]
    Launch(#[source] SupervisorError),

    #[error("cluster never became reachable")]
    Readiness(#[source] TimeoutError),

    #[error("management plane never reported the cluster")]
    Query(#[source] TimeoutError),

    #[error("validation workload failed")]
    Validation(#[source] ValidationError),

    #[error("teardown failed")]
    Teardown(#[source] TeardownError),

    #[error("run cancelled")]
    Cancelled,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub cluster_name: String,
    pub rows_validated: usize,
    /// Exit outcome of the supervised process, when one was reaped. A
    /// bounded launch that ended by deadline or cancellation reports none.
    pub process_exit: Option<ExitOutcome>,
    pub elapsed: Duration,
}

/// Drive one full bootstrap -> validate -> teardown cycle.
///
/// Every phase error is fatal to the run; there is no overall retry. The
/// `cancel` token aborts the long waits (readiness, validation) and the
/// bounded launch; teardown still runs on cancellation once a process
/// exists.
pub async fn run(
    config: &HarnessConfig,
    manager: &dyn ClusterManager,
    cancel: CancellationToken,
) -> Result<RunReport, HarnessError> {
    let started = Instant::now();
    let handle = ClusterHandle::bare_metal(&config.cluster_name);
    let timeouts = &config.timeouts;

    tracing::info!(
        cluster = handle.name(),
        ctl = %config.ctl_binary.display(),
        "starting harness run"
    );

    // 1. Reconcile host ports. Failure here leaves nothing to clean up.
    ports::ensure_ports_free(&config.ports)
        .await
        .map_err(HarnessError::Reconcile)?;

    // 2. Launch the bootstrap. From here on teardown always runs.
    let spec = LaunchSpec::new(&config.ctl_binary, handle.create_args());
    let teardown_policy = TeardownPolicy {
        stop_grace: timeouts.stop_grace(),
        delete_interval: timeouts.delete_interval(),
        delete_budget: timeouts.delete_budget(),
    };

    let (phases, teardown_result) = match config.launch_deadline() {
        None => {
            let mut process = supervisor::launch(&spec)
                .await
                .map_err(HarnessError::Launch)?;

            let phases = tokio::select! {
                result = drive_cluster(config, manager, &handle) => result,
                _ = cancel.cancelled() => Err(HarnessError::Cancelled),
            };

            let teardown_result =
                teardown::teardown(manager, &handle, Some(&mut process), &teardown_policy).await;
            (phases, teardown_result)
        }
        Some(deadline) => {
            let launch_cancel = cancel.child_token();
            let mut bounded =
                supervisor::spawn_bounded(spec, deadline, launch_cancel.clone());

            // Explicit handoff: no readiness polling until the process
            // handle is populated.
            if bounded.started().await.is_err() {
                let err = match bounded.join().await {
                    Err(e) => e,
                    Ok(_) => SupervisorError::ProcessNotInitialized,
                };
                return Err(HarnessError::Launch(err));
            }

            let phases = tokio::select! {
                result = drive_cluster(config, manager, &handle) => result,
                _ = cancel.cancelled() => Err(HarnessError::Cancelled),
            };

            // Reap the bounded run (it self-expires at the deadline), then
            // delete the cluster.
            launch_cancel.cancel();
            let teardown_result = match bounded.join().await {
                Ok(exit) => {
                    tracing::info!(exit = ?exit, "bounded launch reaped");
                    teardown::delete_cluster(manager, &handle, &teardown_policy)
                        .await
                        .map(|()| bounded_exit_outcome(exit))
                }
                Err(e) => Err(TeardownError::Process(e)),
            };
            (phases, teardown_result)
        }
    };

    match (phases, teardown_result) {
        (Err(phase_err), Err(teardown_err)) => {
            tracing::error!(error = %teardown_err, "teardown also failed");
            Err(phase_err)
        }
        (Err(phase_err), Ok(_)) => Err(phase_err),
        (Ok(_), Err(teardown_err)) => Err(HarnessError::Teardown(teardown_err)),
        (Ok(rows_validated), Ok(process_exit)) => {
            let report = RunReport {
                cluster_name: handle.name().to_string(),
                rows_validated,
                process_exit,
                elapsed: started.elapsed(),
            };
            tracing::info!(
                cluster = %report.cluster_name,
                rows = report.rows_validated,
                elapsed_secs = report.elapsed.as_secs(),
                "harness run passed"
            );
            Ok(report)
        }
    }
}

fn bounded_exit_outcome(exit: BoundedExit) -> Option<ExitOutcome> {
    match exit {
        BoundedExit::Completed(outcome) => Some(outcome),
        BoundedExit::DeadlineElapsed | BoundedExit::Cancelled => None,
    }
}

/// Phases 3-6: readiness, management-plane visibility, log dump,
/// validation. Runs only after a process handle exists; never touches the
/// process itself.
async fn drive_cluster(
    config: &HarnessConfig,
    manager: &dyn ClusterManager,
    handle: &ClusterHandle,
) -> Result<usize, HarnessError> {
    let timeouts = &config.timeouts;

    // 3. Readiness gates everything downstream.
    let addr = config.frontend_addr();
    readiness::await_reachable(&addr, timeouts.probe(), timeouts.readiness())
        .await
        .map_err(HarnessError::Readiness)?;

    // 4. Management-plane visibility, under a bounded poll.
    retry::with_deadline(
        "cluster get",
        timeouts.get_interval(),
        timeouts.get_budget(),
        || manager.get(handle),
    )
    .await
    .map_err(HarnessError::Query)?;
    tracing::info!(cluster = handle.name(), "management plane reports cluster");

    // 5. Surface the frontend log for operators. Absence is tolerated.
    if let Some(path) = &config.frontend_log {
        dump_log(path).await;
    }

    // 6. The data-plane oracle.
    let policy = ConnectPolicy {
        interval: timeouts.connect_interval(),
        budget: timeouts.connect_budget(),
    };
    validate::validate(&config.sql, config.batch_size, &policy)
        .await
        .map_err(HarnessError::Validation)
}

/// Copy the cluster's frontend log file to the harness's stdout. A missing
/// or unreadable file is logged, never fatal.
async fn dump_log(path: &Path) {
    match tokio::fs::File::open(path).await {
        Ok(mut file) => {
            tracing::info!(path = %path.display(), "dumping frontend log");
            let mut stdout = tokio::io::stdout();
            if let Err(e) = tokio::io::copy(&mut file, &mut stdout).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to copy frontend log");
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "frontend log not readable, skipping");
        }
    }
}
