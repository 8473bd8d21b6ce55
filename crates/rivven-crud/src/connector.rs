//! Connector entry points
//!
//! `CrudConnector` owns the shared connection and both metadata caches
//! behind one async mutex, so a metadata refresh and the statement that
//! depends on it run as a single critical section.
//!
//! Entry points:
//! - `connection_fields`: configuration form descriptors
//! - `discover`: forced refresh, then the full discovery table
//! - `describe`: parameter contract of one operation on one relation
//! - `execute`: synthesize, bind and run one CRUD request
//! - `unload`: close the shared connection (idempotent, never fails)

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::capability::{self, Operation, OperationDescriptor, ParameterContract};
use crate::config::CrudConnectorConfig;
use crate::connection::{Connection, ConnectionFactory};
use crate::dialect::{SqlDialect, SqlServerDialect};
use crate::error::{Error, Result};
use crate::executor::{ExecutionAdapter, ExecutionOutcome, RowSequence};
use crate::metadata::{MetadataStore, DEFAULT_METADATA_TTL};
use crate::spec::{self, ConfigField};
use crate::statement::{CrudRequest, StatementSynthesizer};
use crate::types::Row;

/// Orchestrator request envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRequest {
    /// Relation full name, empty for discovery
    #[serde(default)]
    pub class: String,
    /// Operation name (`Create`, `Read`, `Update`, `Delete`)
    #[serde(default)]
    pub operation: Option<String>,
    /// Metadata call instead of execution
    #[serde(default)]
    pub get_meta: bool,
    /// Parameter map, either an object or its JSON-encoded string
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ConnectorRequest {
    /// Discovery request
    pub fn discovery() -> Self {
        Self {
            get_meta: true,
            ..Default::default()
        }
    }

    /// Per-relation metadata request
    pub fn describe(class: impl Into<String>, operation: Operation) -> Self {
        Self {
            class: class.into(),
            operation: Some(operation.to_string()),
            get_meta: true,
            ..Default::default()
        }
    }

    /// Execution request
    pub fn execute(
        class: impl Into<String>,
        operation: Operation,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            class: class.into(),
            operation: Some(operation.to_string()),
            get_meta: false,
            parameters,
        }
    }

    fn operation(&self) -> Result<Operation> {
        self.operation
            .as_deref()
            .ok_or_else(|| Error::invalid_parameter("operation", "operation is required"))?
            .parse()
    }

    /// Decode the parameter map
    pub fn parameter_map(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match &self.parameters {
            serde_json::Value::Null => Ok(serde_json::Map::new()),
            serde_json::Value::Object(map) => Ok(map.clone()),
            serde_json::Value::String(s) if s.trim().is_empty() => Ok(serde_json::Map::new()),
            serde_json::Value::String(s) => serde_json::from_str(s).map_err(|e| {
                Error::invalid_parameter("parameters", format!("invalid JSON object: {}", e))
            }),
            _ => Err(Error::invalid_parameter(
                "parameters",
                "expected a JSON object",
            )),
        }
    }
}

/// Response to a `ConnectorRequest`
#[derive(Debug)]
pub enum ConnectorResponse {
    /// Discovery table
    Discovery(Vec<OperationDescriptor>),
    /// Parameter contract
    Contract(ParameterContract),
    /// Lazy Read records
    Records(RowSequence),
    /// Echoed rows of a write
    Rows(Vec<Row>),
}

struct ConnectorState {
    config: Option<CrudConnectorConfig>,
    connection: Option<Arc<dyn Connection>>,
    metadata: MetadataStore,
}

/// Builder for `CrudConnector`
pub struct CrudConnectorBuilder {
    factory: Option<Arc<dyn ConnectionFactory>>,
    dialect: Arc<dyn SqlDialect>,
    metadata_ttl: Duration,
}

impl Default for CrudConnectorBuilder {
    fn default() -> Self {
        Self {
            factory: None,
            dialect: Arc::new(SqlServerDialect),
            metadata_ttl: DEFAULT_METADATA_TTL,
        }
    }
}

impl CrudConnectorBuilder {
    /// Connection factory (defaults to the SQL Server backend when compiled in)
    pub fn factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// SQL dialect (default: SQL Server)
    pub fn dialect(mut self, dialect: impl SqlDialect + 'static) -> Self {
        self.dialect = Arc::new(dialect);
        self
    }

    /// Metadata time-to-live (default: 600 000 ms)
    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Build the connector
    pub fn build(self) -> Result<CrudConnector> {
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory()?,
        };

        Ok(CrudConnector {
            factory,
            dialect: self.dialect,
            state: Mutex::new(ConnectorState {
                config: None,
                connection: None,
                metadata: MetadataStore::new(self.metadata_ttl),
            }),
        })
    }
}

#[cfg(feature = "sqlserver")]
fn default_factory() -> Result<Arc<dyn ConnectionFactory>> {
    Ok(Arc::new(crate::sqlserver::SqlServerConnectionFactory))
}

#[cfg(not(feature = "sqlserver"))]
fn default_factory() -> Result<Arc<dyn ConnectionFactory>> {
    Err(Error::config(
        "no connection factory configured and the sqlserver feature is disabled",
    ))
}

/// Schema-driven CRUD connector
pub struct CrudConnector {
    factory: Arc<dyn ConnectionFactory>,
    dialect: Arc<dyn SqlDialect>,
    state: Mutex<ConnectorState>,
}

impl std::fmt::Debug for CrudConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudConnector")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl CrudConnector {
    /// Create a builder
    pub fn builder() -> CrudConnectorBuilder {
        CrudConnectorBuilder::default()
    }

    /// Configuration-field descriptors, in form order
    pub fn connection_fields(&self) -> Vec<ConfigField> {
        spec::connection_fields()
    }

    /// Discovery call: force a metadata refresh and list every relation x operation
    pub async fn discover(&self, config: &CrudConnectorConfig) -> Result<Vec<OperationDescriptor>> {
        let mut state = self.state.lock().await;
        let conn = self.ensure_connection(&mut state, config).await?;

        state
            .metadata
            .ensure_fresh(conn.as_ref(), self.dialect.as_ref(), config.schema_filter(), true)
            .await?;
        conn.touch().await;

        let table = capability::discover(state.metadata.relations());
        info!(
            relations = state.metadata.relations().len(),
            operations = table.len(),
            "Discovery complete"
        );
        Ok(table)
    }

    /// Per-relation metadata call
    pub async fn describe(
        &self,
        config: &CrudConnectorConfig,
        class: &str,
        operation: Operation,
    ) -> Result<ParameterContract> {
        let mut state = self.state.lock().await;
        let conn = self.ensure_connection(&mut state, config).await?;

        state
            .metadata
            .ensure_fresh(conn.as_ref(), self.dialect.as_ref(), config.schema_filter(), false)
            .await?;
        conn.touch().await;

        let relation = state
            .metadata
            .lookup(class)
            .ok_or_else(|| Error::relation_not_found(class))?;
        capability::contract(relation, operation)
    }

    /// Execute call. Read returns a lazy record stream, writes the echoed rows.
    pub async fn execute(
        &self,
        config: &CrudConnectorConfig,
        class: &str,
        operation: Operation,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ExecutionOutcome> {
        let request = CrudRequest::from_parameters(operation, parameters)?;

        let mut state = self.state.lock().await;
        let conn = self.ensure_connection(&mut state, config).await?;

        state
            .metadata
            .ensure_fresh(conn.as_ref(), self.dialect.as_ref(), config.schema_filter(), false)
            .await?;

        let relation = state
            .metadata
            .lookup(class)
            .cloned()
            .ok_or_else(|| Error::relation_not_found(class))?;
        if !capability::supports(&relation, operation) {
            return Err(Error::unsupported(relation.full_name(), operation));
        }

        let keys = state.metadata.execution_keys(&relation);
        let statement = StatementSynthesizer::new(self.dialect.as_ref(), &relation, &keys)
            .synthesize(&request)?;

        debug!(relation = %relation.full_name(), operation = %operation, "Synthesized statement");
        let outcome = ExecutionAdapter::new(conn.as_ref(), self.dialect.as_ref())
            .execute(operation, &statement)
            .await;
        conn.touch().await;
        outcome
    }

    /// Unload: close the shared connection if open. Never fails.
    pub async fn unload(&self) {
        let mut state = self.state.lock().await;
        state.metadata.invalidate();
        state.config = None;
        if let Some(conn) = state.connection.take() {
            close_quietly(conn).await;
            info!("Connector unloaded");
        }
    }

    /// Whether a shared connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    /// Dispatch an orchestrator request
    pub async fn handle(
        &self,
        config: &CrudConnectorConfig,
        request: &ConnectorRequest,
    ) -> Result<ConnectorResponse> {
        debug!(
            class = %request.class,
            operation = request.operation.as_deref().unwrap_or(""),
            get_meta = request.get_meta,
            "Handling request"
        );

        let class = request.class.trim();
        match (class.is_empty(), request.get_meta) {
            (true, true) => self.discover(config).await.map(ConnectorResponse::Discovery),
            (true, false) => Err(Error::invalid_parameter(
                "class",
                "a relation is required for execution",
            )),
            (false, true) => self
                .describe(config, class, request.operation()?)
                .await
                .map(ConnectorResponse::Contract),
            (false, false) => {
                let operation = request.operation()?;
                let parameters = request.parameter_map()?;
                match self.execute(config, class, operation, &parameters).await? {
                    ExecutionOutcome::Stream(records) => Ok(ConnectorResponse::Records(records)),
                    ExecutionOutcome::Rows(rows) => Ok(ConnectorResponse::Rows(rows)),
                }
            }
        }
    }

    /// Reuse the shared connection, or (re)open it when the parameters
    /// changed, the link is no longer valid, or it sat idle too long.
    /// Every (re)open invalidates both metadata caches.
    async fn ensure_connection(
        &self,
        state: &mut ConnectorState,
        config: &CrudConnectorConfig,
    ) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = state.connection.clone() {
            let reason = if state.config.as_ref() != Some(config) {
                Some("connection parameters changed")
            } else if !conn.is_valid().await {
                Some("connection is no longer valid")
            } else if conn.is_idle_expired(config.session_idle_timeout()).await {
                Some("connection idle timeout exceeded")
            } else {
                None
            };

            match reason {
                None => return Ok(conn),
                Some(reason) => {
                    info!(reason, "Reopening connection");
                    state.connection = None;
                    close_quietly(conn).await;
                }
            }
        }

        state.config = None;
        state.metadata.invalidate();

        let driver_config = config.to_connection_config();
        let conn = self
            .factory
            .connect(&driver_config)
            .await
            .map_err(|e| match e {
                e @ Error::Connection { .. } => e,
                other => Error::connection_with_source("failed to open connection", other),
            })?;

        info!(
            server = %config.server,
            database = %config.database,
            dialect = self.dialect.name(),
            "Connection opened"
        );
        state.connection = Some(Arc::clone(&conn));
        state.config = Some(config.clone());
        Ok(conn)
    }
}

async fn close_quietly(conn: Arc<dyn Connection>) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Error closing connection, ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parameter_map() {
        let req = ConnectorRequest::execute("sales.orders", Operation::Read, json!({"a": 1}));
        assert_eq!(req.parameter_map().unwrap().len(), 1);

        let req = ConnectorRequest::execute(
            "sales.orders",
            Operation::Read,
            json!("{\"where_clause\": \"total > 50\"}"),
        );
        assert_eq!(
            req.parameter_map().unwrap()["where_clause"],
            json!("total > 50")
        );

        let req = ConnectorRequest::execute("sales.orders", Operation::Read, json!([1]));
        assert!(req.parameter_map().is_err());

        assert!(ConnectorRequest::discovery().parameter_map().unwrap().is_empty());
    }

    #[test]
    fn test_request_deserialize() {
        let req: ConnectorRequest = serde_json::from_value(json!({
            "class": "sales.orders",
            "operation": "update",
            "get_meta": false,
            "parameters": {"id": 1}
        }))
        .unwrap();
        assert_eq!(req.operation().unwrap(), Operation::Update);

        let req: ConnectorRequest = serde_json::from_value(json!({"get_meta": true})).unwrap();
        assert_eq!(req, ConnectorRequest::discovery());
        assert!(req.operation().is_err());
    }
}
