//! Facade over the external cluster-management executable.
//!
//! The facade is a pass-through status oracle: each operation invokes the
//! managed executable with the matching subcommand and treats the process
//! exit code as the entire result. No output is parsed. Callers that need
//! eventual success wrap calls in [`crate::retry::with_deadline`]; the
//! facade itself never retries.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::supervisor::ExitOutcome;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The subcommand ran and exited unsuccessfully (or died on a signal).
    #[error("`{subcommand}` failed with {outcome}")]
    Exit {
        subcommand: String,
        outcome: ExitOutcome,
    },

    /// The subcommand could not be run at all.
    #[error("failed to run `{subcommand}`")]
    Spawn {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },
}

/// Logical reference to a cluster: its name plus the deployment mode flag.
///
/// Not a resource -- a key addressing the external tool's operations. The
/// same handle (and therefore the same name) is used across create, get,
/// and delete within one run, and it is the single source of the
/// subcommand argument lists so the launch path and the facade cannot
/// drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    name: String,
    bare_metal: bool,
}

impl ClusterHandle {
    pub fn new(name: impl Into<String>, bare_metal: bool) -> Self {
        Self {
            name: name.into(),
            bare_metal,
        }
    }

    /// A handle for a bare-metal cluster.
    pub fn bare_metal(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// A bare-metal handle with a short random suffix, so concurrent runs
    /// against different port sets cannot collide on the cluster name.
    pub fn unique(prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self::bare_metal(format!("{prefix}-{}", &suffix[..8]))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_args(&self) -> Vec<String> {
        self.args("create", &[])
    }

    pub fn get_args(&self) -> Vec<String> {
        self.args("get", &[])
    }

    pub fn delete_args(&self, tear_down_dependencies: bool) -> Vec<String> {
        if tear_down_dependencies {
            self.args("delete", &["--tear-down-etcd"])
        } else {
            self.args("delete", &[])
        }
    }

    fn args(&self, subcommand: &str, extra: &[&str]) -> Vec<String> {
        let mut args = vec![
            "cluster".to_string(),
            subcommand.to_string(),
            self.name.clone(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        if self.bare_metal {
            args.push("--bare-metal".to_string());
        }
        args
    }
}

/// The management-plane operations the harness drives.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Create the cluster, blocking until the tool exits.
    async fn create(&self, handle: &ClusterHandle) -> Result<(), QueryError>;

    /// Ask the tool whether the cluster is visible.
    async fn get(&self, handle: &ClusterHandle) -> Result<(), QueryError>;

    /// Delete the cluster, optionally tearing down its dependencies.
    async fn delete(
        &self,
        handle: &ClusterHandle,
        tear_down_dependencies: bool,
    ) -> Result<(), QueryError>;
}

/// Production [`ClusterManager`]: runs the configured executable. The
/// subcommand's own output goes straight to the harness's stdio, as the
/// exit status is the only signal the facade reads.
#[derive(Debug, Clone)]
pub struct CtlRunner {
    binary: PathBuf,
}

impl CtlRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn run(&self, args: Vec<String>) -> Result<(), QueryError> {
        let subcommand = args.join(" ");
        tracing::info!(binary = %self.binary.display(), subcommand = %subcommand, "invoking cluster manager");

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| QueryError::Spawn {
                subcommand: subcommand.clone(),
                source,
            })?;

        if status.success() {
            return Ok(());
        }
        Err(QueryError::Exit {
            subcommand,
            outcome: ExitOutcome::from_status(status),
        })
    }
}

#[async_trait]
impl ClusterManager for CtlRunner {
    async fn create(&self, handle: &ClusterHandle) -> Result<(), QueryError> {
        self.run(handle.create_args()).await
    }

    async fn get(&self, handle: &ClusterHandle) -> Result<(), QueryError> {
        self.run(handle.get_args()).await
    }

    async fn delete(
        &self,
        handle: &ClusterHandle,
        tear_down_dependencies: bool,
    ) -> Result<(), QueryError> {
        self.run(handle.delete_args(tear_down_dependencies)).await
    }
}
