//! The `corral run` command: one full bootstrap -> validate -> teardown
//! cycle against the configured cluster manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use corral_core::cluster::{ClusterHandle, CtlRunner};
use corral_core::config::HarnessConfig;
use corral_core::lifecycle;

/// Execute the full lifecycle run described by `config`.
pub async fn cmd_run(mut config: HarnessConfig, unique: bool) -> Result<()> {
    if unique {
        let handle = ClusterHandle::unique(&config.cluster_name);
        config.cluster_name = handle.name().to_string();
        tracing::info!(cluster = %config.cluster_name, "using unique cluster name");
    }

    // Graceful shutdown: first signal cancels the run (teardown still
    // happens), second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nCancelling run, tearing down (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let manager = CtlRunner::new(&config.ctl_binary);
    let report = lifecycle::run(&config, &manager, cancel)
        .await
        .context("harness run failed")?;

    println!(
        "Run passed: cluster {} validated {} rows in {:.1}s",
        report.cluster_name,
        report.rows_validated,
        report.elapsed.as_secs_f64()
    );
    if let Some(exit) = report.process_exit {
        println!("Bootstrap process finished with {exit}.");
    }
    Ok(())
}
