//! The `corral teardown` command: delete a cluster left behind by a
//! crashed or interrupted run. There is no process handle to reap here;
//! only the external cluster state is released.

use anyhow::{Context, Result};

use corral_core::cluster::{ClusterHandle, CtlRunner};
use corral_core::config::HarnessConfig;
use corral_core::teardown::{self, TeardownPolicy};

pub async fn cmd_teardown(config: &HarnessConfig, name: &str) -> Result<()> {
    let manager = CtlRunner::new(&config.ctl_binary);
    let handle = ClusterHandle::bare_metal(name);
    let timeouts = &config.timeouts;
    let policy = TeardownPolicy {
        stop_grace: timeouts.stop_grace(),
        delete_interval: timeouts.delete_interval(),
        delete_budget: timeouts.delete_budget(),
    };

    teardown::delete_cluster(&manager, &handle, &policy)
        .await
        .with_context(|| format!("failed to delete cluster {name}"))?;

    println!("Cluster {name} deleted.");
    Ok(())
}
