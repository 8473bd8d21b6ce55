//! Testing utilities
//!
//! `MockConnection` is a spy driver. It answers the catalog queries from a
//! scripted list of relations, records every other statement, and replays
//! scripted result rows for them. Clones share state, so a test can keep a
//! handle while the connector owns another.
//!
//! # Example
//!
//! ```rust,ignore
//! let db = MockConnection::new().with_relation(orders());
//! let connector = CrudConnector::builder()
//!     .factory(MockConnectionFactory::new(db.clone()))
//!     .build()?;
//!
//! connector.discover(&config).await?;
//! assert_eq!(db.introspection_queries(), 2);
//! assert_eq!(db.execution_count(), 0);
//! ```

use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, ConnectionLifecycle, RowStream,
    SESSION_BUSY,
};
use crate::error::{Error, Result};
use crate::metadata::{RelationKind, RelationMetadata};
use crate::types::{Row, Value};

const MOCK_CATALOG: &str = "mock";

/// A statement the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// Driver text
    pub sql: String,
    /// Bound values
    pub params: Vec<Value>,
}

#[derive(Debug)]
struct MockState {
    relations: Vec<RelationMetadata>,
    results: VecDeque<Vec<Row>>,
    executed: Vec<ExecutedStatement>,
    introspection_queries: usize,
    fail_introspection: bool,
    fail_execution: Option<String>,
    valid: bool,
    closed: bool,
    close_count: usize,
    fail_close: bool,
    exclusive_streams: bool,
    open_streams: usize,
    last_used: tokio::time::Instant,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            relations: Vec::new(),
            results: VecDeque::new(),
            executed: Vec::new(),
            introspection_queries: 0,
            fail_introspection: false,
            fail_execution: None,
            valid: true,
            closed: false,
            close_count: 0,
            fail_close: false,
            exclusive_streams: false,
            open_streams: 0,
            last_used: tokio::time::Instant::now(),
        }
    }
}

/// Spy connection over a scripted catalog
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    /// Create a mock with an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a relation to the scripted catalog
    pub fn with_relation(self, relation: RelationMetadata) -> Self {
        self.state.lock().relations.push(relation);
        self
    }

    /// Queue the rows returned by the next non-catalog statement
    pub fn with_result(self, rows: Vec<Row>) -> Self {
        self.push_result(rows);
        self
    }

    /// Queue the rows returned by the next non-catalog statement
    pub fn push_result(&self, rows: Vec<Row>) {
        self.state.lock().results.push_back(rows);
    }

    /// Make catalog queries fail (or succeed again)
    pub fn fail_introspection(&self, fail: bool) {
        self.state.lock().fail_introspection = fail;
    }

    /// Make non-catalog statements fail with `message`
    pub fn fail_execution(&self, message: impl Into<String>) {
        self.state.lock().fail_execution = Some(message.into());
    }

    /// Set what `is_valid()` reports
    pub fn set_valid(&self, valid: bool) {
        self.state.lock().valid = valid;
    }

    /// Make `close()` fail
    pub fn fail_close(&self) {
        self.state.lock().fail_close = true;
    }

    /// Let an open read stream own the session, as a driver that cannot
    /// multiplex does. Other statements then fail with a busy error.
    pub fn exclusive_streams(self) -> Self {
        self.state.lock().exclusive_streams = true;
        self
    }

    /// Read streams not yet drained or dropped
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }

    /// Catalog queries received (two per metadata refresh)
    pub fn introspection_queries(&self) -> usize {
        self.state.lock().introspection_queries
    }

    /// Non-catalog statements received
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state.lock().executed.clone()
    }

    /// Number of non-catalog statements received
    pub fn execution_count(&self) -> usize {
        self.state.lock().executed.len()
    }

    /// Number of `close()` calls
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Whether the connection is currently closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn reopen(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        state.valid = true;
        state.last_used = tokio::time::Instant::now();
    }

    fn ensure_open(state: &MockState) -> Result<()> {
        if state.closed {
            Err(Error::connection("mock connection is closed"))
        } else {
            Ok(())
        }
    }

    /// Answer a catalog query, or `None` when `sql` is not one
    fn introspect(state: &mut MockState, sql: &str, params: &[Value]) -> Option<Result<Vec<Row>>> {
        let is_pk_query = sql.contains("TABLE_CONSTRAINTS");
        let is_column_query = sql.contains("sys.columns");
        if !is_pk_query && !is_column_query {
            return None;
        }

        state.introspection_queries += 1;
        if state.fail_introspection {
            return Some(Err(Error::execution("catalog view unavailable")));
        }

        let schema = params.first().and_then(Value::as_str);
        let mut relations: Vec<&RelationMetadata> = state
            .relations
            .iter()
            .filter(|r| schema.map_or(true, |s| r.schema == s))
            .collect();
        relations.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));

        let rows = if is_pk_query {
            relations
                .iter()
                .flat_map(|r| {
                    r.primary_key_columns().map(move |c| {
                        Row::new(
                            vec![
                                "catalog_name".into(),
                                "schema_name".into(),
                                "table_name".into(),
                                "column_name".into(),
                            ],
                            vec![
                                MOCK_CATALOG.into(),
                                r.schema.as_str().into(),
                                r.name.as_str().into(),
                                c.name.as_str().into(),
                            ],
                        )
                    })
                })
                .collect()
        } else {
            relations
                .iter()
                .flat_map(|r| {
                    let mut columns: Vec<_> = r.columns.iter().collect();
                    columns.sort_by(|a, b| a.name.cmp(&b.name));
                    let kind = match r.kind {
                        RelationKind::View => "VIEW",
                        _ => "TABLE",
                    };
                    columns.into_iter().map(move |c| {
                        Row::new(
                            vec![
                                "catalog_name".into(),
                                "schema_name".into(),
                                "relation_name".into(),
                                "relation_type".into(),
                                "column_name".into(),
                                "type_name".into(),
                                "is_nullable".into(),
                                "is_identity".into(),
                                "is_computed".into(),
                            ],
                            vec![
                                MOCK_CATALOG.into(),
                                r.schema.as_str().into(),
                                r.name.as_str().into(),
                                kind.into(),
                                c.name.as_str().into(),
                                c.type_name.as_str().into(),
                                Value::Bool(c.is_nullable),
                                Value::Bool(c.is_identity),
                                Value::Bool(c.is_computed),
                            ],
                        )
                    })
                })
                .collect()
        };
        Some(Ok(rows))
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.exclusive_streams && state.open_streams > 0 {
            return Err(Error::execution(SESSION_BUSY));
        }

        if let Some(result) = Self::introspect(&mut state, sql, params) {
            return result;
        }

        state.executed.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(message) = &state.fail_execution {
            return Err(Error::execution(message.clone()));
        }
        Ok(state.results.pop_front().unwrap_or_default())
    }
}

/// Marks a read stream as open until dropped
struct StreamLease {
    state: Arc<Mutex<MockState>>,
}

impl StreamLease {
    fn open(state: &Arc<Mutex<MockState>>) -> Self {
        state.lock().open_streams += 1;
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_streams = state.open_streams.saturating_sub(1);
    }
}

#[async_trait]
impl ConnectionLifecycle for MockConnection {
    async fn idle_time(&self) -> Duration {
        self.state.lock().last_used.elapsed()
    }

    async fn touch(&self) {
        self.state.lock().last_used = tokio::time::Instant::now();
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run(sql, params)
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        let rows = self.run(sql, params)?;
        let lease = StreamLease::open(&self.state);
        let stream = async_stream::stream! {
            let _lease = lease;
            for row in rows {
                yield Ok(row);
            }
        };
        Ok(stream.boxed())
    }

    async fn is_valid(&self) -> bool {
        let state = self.state.lock();
        state.valid && !state.closed
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.close_count += 1;
        state.closed = true;
        if state.fail_close {
            return Err(Error::connection("mock close failure"));
        }
        Ok(())
    }
}

/// Factory handing out the same `MockConnection`, reopened on every connect
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    connection: MockConnection,
    connects: Arc<Mutex<Vec<ConnectionConfig>>>,
    failures: Arc<Mutex<usize>>,
}

impl MockConnectionFactory {
    /// Create a factory for `connection`
    pub fn new(connection: MockConnection) -> Self {
        Self {
            connection,
            connects: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Fail the next `n` connect attempts
    pub fn fail_next_connects(&self, n: usize) {
        *self.failures.lock() = n;
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    /// Driver configs of every successful connect
    pub fn configs(&self) -> Vec<ConnectionConfig> {
        self.connects.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::connection(format!(
                    "connection refused by {}:{}",
                    config.host, config.port
                )));
            }
        }

        self.connection.reopen();
        self.connects.lock().push(config.clone());
        Ok(Arc::new(self.connection.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnMetadata;

    fn catalog() -> MockConnection {
        MockConnection::new()
            .with_relation(
                RelationMetadata::new("sales", "orders", RelationKind::Table)
                    .with_column(ColumnMetadata::new("total", "decimal"))
                    .with_column(ColumnMetadata::new("id", "int").primary_key()),
            )
            .with_relation(RelationMetadata::new("hr", "people", RelationKind::View).with_column(
                ColumnMetadata::new("name", "nvarchar"),
            ))
    }

    #[tokio::test]
    async fn test_catalog_rows_are_ordered() {
        let conn = catalog();
        let rows = conn.query("SELECT ... FROM sys.columns", &[]).await.unwrap();
        let names: Vec<_> = rows
            .iter()
            .map(|r| {
                format!(
                    "{}.{}.{}",
                    r.get_by_name("schema_name").and_then(Value::as_str).unwrap(),
                    r.get_by_name("relation_name").and_then(Value::as_str).unwrap(),
                    r.get_by_name("column_name").and_then(Value::as_str).unwrap()
                )
            })
            .collect();
        assert_eq!(names, vec!["hr.people.name", "sales.orders.id", "sales.orders.total"]);
        assert_eq!(conn.introspection_queries(), 1);
        assert_eq!(conn.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_filter_param() {
        let conn = catalog();
        let rows = conn
            .query("SELECT ... sys.columns ... @P1", &[Value::from("sales")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_statements_are_recorded() {
        let conn = catalog().with_result(vec![Row::new(vec!["n".into()], vec![Value::Int32(1)])]);
        let rows = conn.query("SELECT 1 AS n", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(conn.statements()[0].sql, "SELECT 1 AS n");

        conn.close().await.unwrap();
        assert!(!conn.is_valid().await);
        assert!(conn.query("SELECT 1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_exclusive_stream_holds_session_until_dropped() {
        let row = Row::new(vec!["n".into()], vec![Value::Int32(1)]);
        let conn = catalog()
            .exclusive_streams()
            .with_result(vec![row.clone(), row]);

        let mut stream = conn.query_stream("SELECT n FROM t", &[]).await.unwrap();
        assert!(stream.next().await.is_some());
        assert_eq!(conn.open_streams(), 1);

        let err = conn.query("SELECT 2", &[]).await.unwrap_err();
        assert!(err.to_string().contains(SESSION_BUSY));
        assert!(conn.is_valid().await);

        drop(stream);
        assert_eq!(conn.open_streams(), 0);
        assert!(conn.query("SELECT 2", &[]).await.is_ok());
    }
}
