//! Harness configuration.
//!
//! Everything a run touches -- cluster name, managed-executable path, port
//! set, endpoints, timeout budgets -- is explicit per-run configuration so
//! that two runs with different names and port sets can coexist. Nothing in
//! the library reads globals.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Cluster name used consistently across create/get/delete.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Path to the external cluster-management executable.
    #[serde(default = "default_ctl_binary")]
    pub ctl_binary: PathBuf,

    /// Host the cluster's services bind on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Ports the cluster will bind; swept for stale claims before launch.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Port probed for TCP readiness.
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,

    /// Frontend log file copied to stdout once the cluster is reachable.
    /// Absence of the file is tolerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_log: Option<PathBuf>,

    /// Number of rows written and read back by the validation workload.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// When set, the launch runs in bounded mode: the child is cancelled
    /// automatically after this many seconds, and that is success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_deadline_secs: Option<u64>,

    /// SQL endpoint for the validation workload.
    #[serde(default)]
    pub sql: SqlEndpoint,

    #[serde(default)]
    pub timeouts: Timeouts,
}

/// SQL endpoint of the cluster. The validation workload authenticates with
/// empty credentials and selects no default database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlEndpoint {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_sql_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Timeout budgets, in whole seconds.
///
/// Every polling loop in the harness takes an overall deadline from here;
/// none of them may loop unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Overall deadline for the TCP readiness wait.
    #[serde(default = "default_readiness_secs")]
    pub readiness_secs: u64,
    /// Per-attempt timeout for a single readiness probe.
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    /// Interval / budget for polling `cluster get`.
    #[serde(default = "default_get_interval_secs")]
    pub get_interval_secs: u64,
    #[serde(default = "default_get_budget_secs")]
    pub get_budget_secs: u64,
    /// Interval / budget for establishing the SQL client connection.
    #[serde(default = "default_connect_interval_secs")]
    pub connect_interval_secs: u64,
    #[serde(default = "default_connect_budget_secs")]
    pub connect_budget_secs: u64,
    /// Interval / budget for retrying `cluster delete` during teardown.
    #[serde(default = "default_delete_interval_secs")]
    pub delete_interval_secs: u64,
    #[serde(default = "default_delete_budget_secs")]
    pub delete_budget_secs: u64,
    /// Grace period between SIGTERM and SIGKILL when stopping the child.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_cluster_name() -> String {
    "mycluster".to_string()
}

fn default_ctl_binary() -> PathBuf {
    PathBuf::from("clusterctl")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![4000, 4001, 4002, 4003]
}

fn default_frontend_port() -> u16 {
    4000
}

fn default_sql_port() -> u16 {
    4002
}

fn default_batch_size() -> usize {
    10
}

fn default_readiness_secs() -> u64 {
    300
}

fn default_probe_secs() -> u64 {
    2
}

fn default_get_interval_secs() -> u64 {
    1
}

fn default_get_budget_secs() -> u64 {
    30
}

fn default_connect_interval_secs() -> u64 {
    1
}

fn default_connect_budget_secs() -> u64 {
    60
}

fn default_delete_interval_secs() -> u64 {
    2
}

fn default_delete_budget_secs() -> u64 {
    60
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            ctl_binary: default_ctl_binary(),
            host: default_host(),
            ports: default_ports(),
            frontend_port: default_frontend_port(),
            sql: SqlEndpoint::default(),
            frontend_log: None,
            batch_size: default_batch_size(),
            launch_deadline_secs: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for SqlEndpoint {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_sql_port(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness_secs: default_readiness_secs(),
            probe_secs: default_probe_secs(),
            get_interval_secs: default_get_interval_secs(),
            get_budget_secs: default_get_budget_secs(),
            connect_interval_secs: default_connect_interval_secs(),
            connect_budget_secs: default_connect_budget_secs(),
            delete_interval_secs: default_delete_interval_secs(),
            delete_budget_secs: default_delete_budget_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl HarnessConfig {
    /// Address probed for TCP readiness, e.g. `127.0.0.1:4000`.
    pub fn frontend_addr(&self) -> String {
        format!("{}:{}", self.host, self.frontend_port)
    }

    /// Deadline the launch runs under, when bounded mode is configured.
    pub fn launch_deadline(&self) -> Option<Duration> {
        self.launch_deadline_secs.map(Duration::from_secs)
    }
}

impl Timeouts {
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn get_interval(&self) -> Duration {
        Duration::from_secs(self.get_interval_secs)
    }

    pub fn get_budget(&self) -> Duration {
        Duration::from_secs(self.get_budget_secs)
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_secs(self.connect_interval_secs)
    }

    pub fn connect_budget(&self) -> Duration {
        Duration::from_secs(self.connect_budget_secs)
    }

    pub fn delete_interval(&self) -> Duration {
        Duration::from_secs(self.delete_interval_secs)
    }

    pub fn delete_budget(&self) -> Duration {
        Duration::from_secs(self.delete_budget_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HarnessConfig::default();
        assert_eq!(config.cluster_name, "mycluster");
        assert_eq!(config.ports, vec![4000, 4001, 4002, 4003]);
        assert_eq!(config.frontend_port, 4000);
        assert_eq!(config.sql.port, 4002);
        assert_eq!(config.batch_size, 10);
        assert!(config.launch_deadline_secs.is_none());
        assert_eq!(config.timeouts.readiness(), Duration::from_secs(300));
        assert_eq!(config.timeouts.probe(), Duration::from_secs(2));
    }

    #[test]
    fn frontend_addr_combines_host_and_port() {
        let mut config = HarnessConfig::default();
        config.host = "10.0.0.7".to_string();
        config.frontend_port = 14000;
        assert_eq!(config.frontend_addr(), "10.0.0.7:14000");
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.cluster_name, "mycluster");
        assert_eq!(config.sql.user, "");
        assert_eq!(config.timeouts.get_budget_secs, 30);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: HarnessConfig = toml::from_str(
            r#"
            cluster_name = "isolated-a"
            ports = [14000, 14001]

            [timeouts]
            readiness_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster_name, "isolated-a");
        assert_eq!(config.ports, vec![14000, 14001]);
        assert_eq!(config.timeouts.readiness_secs, 30);
        // Untouched fields keep their defaults.
        assert_eq!(config.timeouts.probe_secs, 2);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn launch_deadline_round_trips() {
        let mut config = HarnessConfig::default();
        config.launch_deadline_secs = Some(120);
        assert_eq!(config.launch_deadline(), Some(Duration::from_secs(120)));

        let serialized = toml::to_string(&config).unwrap();
        let parsed: HarnessConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.launch_deadline_secs, Some(120));
    }
}
