//! Statement execution
//!
//! Reads hand back a lazy `RowSequence` over the driver's row stream. Writes
//! are executed buffered: every row of every result set is drained before
//! returning, so the echo SELECT (or `OUTPUT` clause) comes back as a list.

use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

use crate::binder::SynthesizedStatement;
use crate::capability::Operation;
use crate::connection::{Connection, RowStream};
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::Row;

/// Lazy, forward-only sequence of result rows.
///
/// Single pass: once a row has been yielded it cannot be read again, and the
/// sequence cannot be restarted. Reading the same data twice requires
/// executing the statement again.
pub struct RowSequence {
    inner: RowStream,
    yielded: u64,
}

impl RowSequence {
    /// Wrap a driver row stream
    pub fn new(inner: RowStream) -> Self {
        Self { inner, yielded: 0 }
    }

    /// Build a sequence over already materialized rows
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Rows yielded so far
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Drain the remaining rows
    pub async fn collect_rows(self) -> Result<Vec<Row>> {
        self.try_collect().await
    }

    /// Map every remaining row to a JSON object (NULL columns kept as `null`)
    pub fn into_json(self) -> BoxStream<'static, Result<serde_json::Value>> {
        self.map_ok(|row| row.to_json()).boxed()
    }
}

impl Stream for RowSequence {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(Ok(_))) = &polled {
            self.yielded += 1;
        }
        polled
    }
}

impl fmt::Debug for RowSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSequence")
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}

/// Result of executing one statement
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Lazy rows of a Read
    Stream(RowSequence),
    /// Echoed rows of a write
    Rows(Vec<Row>),
}

impl ExecutionOutcome {
    /// Materialize the outcome
    pub async fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Self::Stream(seq) => seq.collect_rows().await,
            Self::Rows(rows) => Ok(rows),
        }
    }
}

/// Executes synthesized statements on a connection
pub struct ExecutionAdapter<'a> {
    conn: &'a dyn Connection,
    dialect: &'a dyn SqlDialect,
}

impl<'a> ExecutionAdapter<'a> {
    /// Create an adapter for a connection
    pub fn new(conn: &'a dyn Connection, dialect: &'a dyn SqlDialect) -> Self {
        Self { conn, dialect }
    }

    /// Execute `statement`. No retries: statements are not idempotent.
    pub async fn execute(
        &self,
        operation: Operation,
        statement: &SynthesizedStatement,
    ) -> Result<ExecutionOutcome> {
        let audit = statement.deparameterize();
        debug!(operation = %operation, sql = %audit, "Executing statement");

        let sql = statement.driver_text(self.dialect);
        let params = statement.values();

        if operation.is_write() {
            let rows = self
                .conn
                .query(&sql, &params)
                .await
                .map_err(|e| execution_error(e, &audit))?;
            debug!(operation = %operation, rows = rows.len(), "Statement completed");
            Ok(ExecutionOutcome::Rows(rows))
        } else {
            let stream = self
                .conn
                .query_stream(&sql, &params)
                .await
                .map_err(|e| execution_error(e, &audit))?;
            let stream = stream.map_err(move |e| execution_error(e, &audit)).boxed();
            Ok(ExecutionOutcome::Stream(RowSequence::new(stream)))
        }
    }
}

/// Attach the audit SQL to a driver failure, wrapping anything that is not
/// already an execution error.
fn execution_error(err: Error, audit: &str) -> Error {
    match err {
        Error::Execution {
            message,
            sql: None,
            source,
        } => Error::Execution {
            message,
            sql: Some(audit.to_string()),
            source,
        },
        err @ Error::Execution { .. } => err,
        other => Error::execution_with_source("statement execution failed", audit, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn row(id: i32) -> Row {
        Row::new(vec!["id".into(), "note".into()], vec![Value::Int32(id), Value::Null])
    }

    #[tokio::test]
    async fn test_row_sequence_is_single_pass() {
        let mut seq = RowSequence::from_rows(vec![row(1), row(2)]);
        let first = seq.next().await.unwrap().unwrap();
        assert_eq!(first.get(0), Some(&Value::Int32(1)));
        assert_eq!(seq.yielded(), 1);

        let rest = seq.collect_rows().await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].get(0), Some(&Value::Int32(2)));
    }

    #[tokio::test]
    async fn test_into_json_keeps_nulls() {
        let json: Vec<_> = RowSequence::from_rows(vec![row(1)])
            .into_json()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(json, vec![serde_json::json!({"id": 1, "note": null})]);
    }

    #[test]
    fn test_execution_error_carries_audit_sql() {
        let err = execution_error(Error::execution("deadlock"), "DELETE FROM t");
        match err {
            Error::Execution { sql, message, .. } => {
                assert_eq!(sql.as_deref(), Some("DELETE FROM t"));
                assert_eq!(message, "deadlock");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = execution_error(Error::connection("reset"), "SELECT 1");
        assert!(matches!(err, Error::Execution { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
