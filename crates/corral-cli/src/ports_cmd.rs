//! The `corral ports` commands: host-port maintenance outside a full run.

use anyhow::{Context, Result};

use corral_core::config::HarnessConfig;
use corral_core::ports;

/// Sweep the configured ports, killing any stale owners.
pub async fn cmd_ports_free(config: &HarnessConfig) -> Result<()> {
    ports::ensure_ports_free(&config.ports)
        .await
        .context("port sweep failed")?;

    println!(
        "Ports {} are free.",
        config
            .ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
