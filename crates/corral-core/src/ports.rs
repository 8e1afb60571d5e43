//! Pre-launch reconciliation of the cluster's TCP ports.
//!
//! The cluster binds a fixed set of ports on the host; a stale process left
//! over from an earlier run will make the bootstrap fail in confusing ways.
//! The reconciler inspects each port with `lsof`, force-kills any owner it
//! finds, and re-verifies the port is actually free before the launch is
//! allowed to proceed. Killing whatever happens to occupy a harness port is
//! an accepted precondition of running the harness, not a bug to hide.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Attempts and pause while waiting for the kernel to release a claim after
/// the owner is killed.
const RELEASE_ATTEMPTS: u32 = 10;
const RELEASE_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The OS-level inspection itself failed (e.g. `lsof` is unavailable).
    #[error("failed to inspect port {port}")]
    Inspect {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Sending the termination signal to the owner failed.
    #[error("failed to terminate pid {pid} holding port {port}")]
    Terminate {
        port: u16,
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    /// The claim survived termination; launching onto this port would race.
    #[error("port {port} still occupied by pid {pid} after termination")]
    StillOccupied { port: u16, pid: i32 },
}

/// An OS-level listener observed on a port. Ownership is external and
/// transient; the reconciler only observes and terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortClaim {
    pub port: u16,
    pub pid: i32,
}

/// Ensure none of the given ports has a live listener.
///
/// Idempotent on a free port set. Fails only if inspection errors, the
/// owner cannot be signalled, or a claim survives termination.
pub async fn ensure_ports_free(ports: &[u16]) -> Result<(), ReconcileError> {
    for &port in ports {
        reconcile_port(port).await?;
    }
    Ok(())
}

async fn reconcile_port(port: u16) -> Result<(), ReconcileError> {
    let Some(claim) = port_owner(port).await? else {
        tracing::debug!(port, "port is free");
        return Ok(());
    };

    tracing::warn!(
        port,
        pid = claim.pid,
        "port held by stale process, terminating it"
    );
    kill_pid(claim.pid).map_err(|source| ReconcileError::Terminate {
        port,
        pid: claim.pid,
        source,
    })?;

    // The kernel may take a moment to tear the listener down.
    for _ in 0..RELEASE_ATTEMPTS {
        tokio::time::sleep(RELEASE_PAUSE).await;
        if port_owner(port).await?.is_none() {
            tracing::info!(port, pid = claim.pid, "stale claim cleared");
            return Ok(());
        }
    }

    let survivor = port_owner(port).await?.map_or(claim.pid, |c| c.pid);
    Err(ReconcileError::StillOccupied {
        port,
        pid: survivor,
    })
}

/// Query the OS for the process listening on `port`, if any.
///
/// Uses `lsof -t`, which prints bare pids. `lsof` exits non-zero when it
/// finds nothing, so the exit status alone is not a failure signal; only a
/// spawn error (inspection tool unavailable) is.
pub async fn port_owner(port: u16) -> Result<Option<PortClaim>, ReconcileError> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg("-i")
        .arg(format!("TCP:{port}"))
        .arg("-s")
        .arg("TCP:LISTEN")
        .output()
        .await
        .map_err(|source| ReconcileError::Inspect { port, source })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_lsof_pid(&stdout).map(|pid| PortClaim { port, pid }))
}

/// First pid in `lsof -t` output (one pid per line).
fn parse_lsof_pid(stdout: &str) -> Option<i32> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| line.parse().ok())
}

#[cfg(unix)]
fn kill_pid(pid: i32) -> std::io::Result<()> {
    // SAFETY: plain kill(2) on a pid we just observed.
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Owner vanished between inspection and the signal.
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn kill_pid(_pid: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "port reconciliation is only supported on unix",
    ))
}
