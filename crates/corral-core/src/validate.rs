//! Functional validation workload against the cluster's SQL endpoint.
//!
//! The management plane saying "the cluster exists" proves nothing about
//! the data plane. This workload connects a MySQL-wire client, creates a
//! table, writes a deterministic batch, reads it back, and asserts exact
//! 1:1 correspondence. All-or-nothing per run: any step failing fails the
//! whole validation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, MySqlConnection, Row};
use thiserror::Error;

use crate::config::SqlEndpoint;
use crate::retry::{self, TimeoutError};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS validation_rows ( \
     ts TIMESTAMP DEFAULT current_timestamp(), \
     n INT, \
     row_id INT, \
     TIME INDEX (ts), \
     PRIMARY KEY (n) \
 )";
const INSERT_SQL: &str = "INSERT INTO validation_rows (n, row_id) VALUES (?, ?)";
const SELECT_SQL: &str = "SELECT ts, n, row_id FROM validation_rows ORDER BY row_id";

#[derive(Debug, Error)]
pub enum ValidationError {
    /// The SQL endpoint never accepted a client connection. The TCP port
    /// being open does not imply the protocol is served yet, which is why
    /// connecting gets its own bounded retry.
    #[error("could not establish SQL connection")]
    Connect(#[source] TimeoutError),

    /// Schema creation failed. Structural, not transient: no retry.
    #[error("schema creation failed")]
    Schema(#[source] sqlx::Error),

    #[error("insert of row {row_id} failed")]
    Insert {
        row_id: i32,
        #[source]
        source: sqlx::Error,
    },

    #[error("select query failed")]
    Query(#[source] sqlx::Error),

    #[error("failed to decode a returned row")]
    Decode(#[source] sqlx::Error),

    /// Extra rows mean leaked state from an earlier run; missing rows mean
    /// lost writes. Both are correctness violations.
    #[error("row count mismatch: expected {expected}, got {actual}")]
    RowCount { expected: usize, actual: usize },

    #[error("row {row_id}: {field} mismatch, expected {expected}, got {actual}")]
    RowMismatch {
        row_id: i32,
        field: &'static str,
        expected: i32,
        actual: i32,
    },
}

/// One row of the validation batch. Record k carries `n == k` and
/// `row_id == k`; the timestamp is server-assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub ts: DateTime<Utc>,
    pub n: i32,
    pub row_id: i32,
}

/// Retry shape for establishing the client connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

/// Run the full write/read workload: connect, create the table, insert
/// `batch` deterministic rows, read them back, and check exact
/// correspondence. Returns the validated row count.
pub async fn validate(
    endpoint: &SqlEndpoint,
    batch: usize,
    policy: &ConnectPolicy,
) -> Result<usize, ValidationError> {
    let mut conn = connect(endpoint, policy).await?;
    tracing::info!(
        host = %endpoint.host,
        port = endpoint.port,
        "SQL connection established"
    );

    let result = run_workload(&mut conn, batch).await;
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "error closing SQL connection");
    }
    result
}

async fn run_workload(conn: &mut MySqlConnection, batch: usize) -> Result<usize, ValidationError> {
    sqlx::query(CREATE_TABLE_SQL)
        .execute(&mut *conn)
        .await
        .map_err(ValidationError::Schema)?;
    tracing::debug!("validation table ready");

    for k in 1..=batch as i32 {
        sqlx::query(INSERT_SQL)
            .bind(k)
            .bind(k)
            .execute(&mut *conn)
            .await
            .map_err(|source| ValidationError::Insert { row_id: k, source })?;
    }
    tracing::info!(rows = batch, "batch inserted");

    let rows = sqlx::query(SELECT_SQL)
        .fetch_all(&mut *conn)
        .await
        .map_err(ValidationError::Query)?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        records.push(ValidationRecord {
            ts: row.try_get("ts").map_err(ValidationError::Decode)?,
            n: row.try_get("n").map_err(ValidationError::Decode)?,
            row_id: row.try_get("row_id").map_err(ValidationError::Decode)?,
        });
    }

    check_batch(&records, batch)?;
    tracing::info!(rows = records.len(), "batch read back and verified");
    Ok(records.len())
}

/// Assert the returned batch corresponds 1:1 to what was written: exactly
/// `expected` rows, and row k (in select order) carries `row_id == k` and
/// `n == k`.
pub fn check_batch(records: &[ValidationRecord], expected: usize) -> Result<(), ValidationError> {
    if records.len() != expected {
        return Err(ValidationError::RowCount {
            expected,
            actual: records.len(),
        });
    }
    for (i, record) in records.iter().enumerate() {
        let k = i as i32 + 1;
        if record.row_id != k {
            return Err(ValidationError::RowMismatch {
                row_id: k,
                field: "row_id",
                expected: k,
                actual: record.row_id,
            });
        }
        if record.n != k {
            return Err(ValidationError::RowMismatch {
                row_id: k,
                field: "n",
                expected: k,
                actual: record.n,
            });
        }
    }
    Ok(())
}

async fn connect(
    endpoint: &SqlEndpoint,
    policy: &ConnectPolicy,
) -> Result<MySqlConnection, ValidationError> {
    let mut options = MySqlConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .username(&endpoint.user);
    if !endpoint.password.is_empty() {
        options = options.password(&endpoint.password);
    }

    let operation = format!("sql connect to {}:{}", endpoint.host, endpoint.port);
    retry::with_deadline(&operation, policy.interval, policy.budget, || {
        let options = options.clone();
        async move { MySqlConnection::connect_with(&options).await }
    })
    .await
    .map_err(ValidationError::Connect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(n: usize) -> Vec<ValidationRecord> {
        (1..=n as i32)
            .map(|k| ValidationRecord {
                ts: Utc::now(),
                n: k,
                row_id: k,
            })
            .collect()
    }

    #[test]
    fn check_batch_accepts_exact_correspondence() {
        for n in [1, 2, 10, 100] {
            check_batch(&batch_of(n), n).unwrap();
        }
    }

    #[test]
    fn check_batch_rejects_missing_rows() {
        let err = check_batch(&batch_of(9), 10).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::RowCount {
                expected: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn check_batch_rejects_leaked_extra_rows() {
        let err = check_batch(&batch_of(11), 10).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::RowCount {
                expected: 10,
                actual: 11
            }
        ));
    }

    #[test]
    fn check_batch_rejects_field_mismatch() {
        let mut records = batch_of(5);
        records[2].n = 99;
        let err = check_batch(&records, 5).unwrap_err();
        match err {
            ValidationError::RowMismatch {
                row_id,
                field,
                expected,
                actual,
            } => {
                assert_eq!(row_id, 3);
                assert_eq!(field, "n");
                assert_eq!(expected, 3);
                assert_eq!(actual, 99);
            }
            other => panic!("expected RowMismatch, got {other:?}"),
        }
    }

    #[test]
    fn check_batch_rejects_out_of_order_row_ids() {
        let mut records = batch_of(3);
        records.swap(0, 2);
        let err = check_batch(&records, 3).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::RowMismatch {
                field: "row_id",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn connect_times_out_against_closed_port() {
        let endpoint = SqlEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: String::new(),
            password: String::new(),
        };
        let policy = ConnectPolicy {
            interval: Duration::from_millis(50),
            budget: Duration::from_millis(300),
        };

        let err = validate(&endpoint, 10, &policy).await.unwrap_err();
        assert!(matches!(err, ValidationError::Connect(_)));
    }
}
