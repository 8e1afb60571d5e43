//! TCP readiness probe for the cluster's frontend port.
//!
//! A successful connect is a proxy for "service accepting connections",
//! nothing more; functional correctness is the validation workload's job.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::retry::TimeoutError;

/// Pause between failed attempts, so instantly-refused connects do not
/// spin the loop.
const PROBE_PAUSE: Duration = Duration::from_millis(50);

/// Block until `addr` accepts a TCP connection.
///
/// Each probe is bounded by `per_attempt`; the whole wait is bounded by
/// `overall` and fails with [`TimeoutError`] at or after that deadline.
/// The probe connection is closed as soon as it is established.
pub async fn await_reachable(
    addr: &str,
    per_attempt: Duration,
    overall: Duration,
) -> Result<(), TimeoutError> {
    tracing::info!(addr, deadline_secs = overall.as_secs(), "waiting for TCP readiness");

    match tokio::time::timeout(overall, probe_until_connected(addr, per_attempt)).await {
        Ok(()) => {
            tracing::info!(addr, "endpoint reachable");
            Ok(())
        }
        Err(_elapsed) => Err(TimeoutError::new(format!("tcp probe of {addr}"), overall)),
    }
}

async fn probe_until_connected(addr: &str, per_attempt: Duration) {
    loop {
        match tokio::time::timeout(per_attempt, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                return;
            }
            Ok(Err(e)) => {
                tracing::trace!(addr, error = %e, "probe failed");
                tokio::time::sleep(PROBE_PAUSE).await;
            }
            Err(_attempt_timeout) => {
                // The attempt itself bounds the loop rate; go again.
            }
        }
    }
}
