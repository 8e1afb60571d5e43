//! Core library for the corral lifecycle harness.
//!
//! Drives an external cluster-management executable through a full
//! bootstrap -> validate -> teardown cycle for a bare-metal database
//! cluster, and proves the result with a TCP readiness probe plus a SQL
//! write/read workload against the cluster's wire endpoint.
//!
//! The harness is the *consumer* of cluster management: the management tool
//! is invoked as an opaque executable, and the only success signals it
//! trusts are process exit codes and the database's own client protocol.

pub mod cluster;
pub mod config;
pub mod lifecycle;
pub mod ports;
pub mod readiness;
pub mod retry;
pub mod supervisor;
pub mod teardown;
pub mod validate;
