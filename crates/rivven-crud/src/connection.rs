//! Connection traits for rivven-crud
//!
//! The raw driver is an external collaborator. The connector talks to it
//! through these narrow traits:
//! - Connection: buffered queries, lazy row streams, liveness check
//! - ConnectionLifecycle: idle tracking used for stale-connection recycling
//! - ConnectionFactory: opens a connection from a `ConnectionConfig`

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Row, Value};

/// Forward-only row stream produced by the driver.
///
/// The stream owns whatever driver resources it needs; dropping it releases
/// them. It cannot be restarted.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Failure message for a statement issued while a row stream owns the session
pub const SESSION_BUSY: &str = "a read stream is still open on this connection";

/// Lifecycle tracking for connections
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync {
    /// Get duration since this connection was last used
    async fn idle_time(&self) -> Duration;

    /// Check if connection has exceeded idle timeout
    async fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_time().await > idle_timeout
    }

    /// Update the last-used timestamp
    async fn touch(&self);
}

/// A connection to a database
#[async_trait]
pub trait Connection: ConnectionLifecycle {
    /// Execute a statement batch and buffer every row of every result set
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and stream its rows lazily.
    ///
    /// A driver that cannot multiplex keeps the session busy until the stream
    /// is drained or dropped. While busy, `query` fails immediately with an
    /// execution error instead of waiting.
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream>;

    /// Check if connection is open and usable. Never waits on an open stream:
    /// a busy session counts as live.
    async fn is_valid(&self) -> bool;

    /// Close the connection without waiting on an open stream
    async fn close(&self) -> Result<()>;
}

/// Driver-level configuration, fixed when the connection is opened
#[derive(Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database (catalog) to open
    pub database: String,
    /// Login name
    pub username: Option<String>,
    /// Login password, exposed only to the driver
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-statement timeout in milliseconds (0 = no timeout)
    pub query_timeout_ms: u64,
    /// Application name reported to the server
    pub application_name: Option<String>,
    /// Trust the server certificate without validation
    pub trust_cert: bool,
    /// Additional backend-specific properties
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("application_name", &self.application_name)
            .field("trust_cert", &self.trust_cert)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1433,
            database: String::new(),
            username: None,
            password: None,
            connect_timeout_ms: 15_000,
            query_timeout_ms: 30_000,
            application_name: Some("rivven-crud".into()),
            trust_cert: false,
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration for a host and database
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set query timeout
    pub fn with_query_timeout(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Query timeout as a duration, `None` when disabled
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("db.internal", "sales")
            .with_connect_timeout(5000)
            .with_query_timeout(15000)
            .with_property("role", "reporting");

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.database, "sales");
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(15000)));
        assert_eq!(config.properties.get("role"), Some(&"reporting".into()));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = ConnectionConfig::new("localhost", "sales");
        config.password = Some("hunter2".into());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_zero_query_timeout_disables_timeout() {
        let config = ConnectionConfig::default().with_query_timeout(0);
        assert_eq!(config.query_timeout(), None);
    }
}
