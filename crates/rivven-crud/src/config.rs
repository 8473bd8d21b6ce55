//! Connection parameters
//!
//! The orchestrator passes a JSON-encoded parameter map. It is parsed into
//! `CrudConnectorConfig`, validated, and turned into the driver-level
//! `ConnectionConfig` (timeouts are fixed at open time).
//!
//! # Example
//!
//! ```json
//! {
//!   "server": "sql.internal",
//!   "database": "shop",
//!   "schema": "sales",
//!   "username": "crud_app",
//!   "password": "...",
//!   "query_timeout": 30
//! }
//! ```

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};

/// A string that never shows up in logs or serialized config dumps
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value. Only the driver needs it.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for SensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.expose_secret() == other.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
        }
        schema
    }
}

/// Connection parameters recognized by the connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, JsonSchema)]
pub struct CrudConnectorConfig {
    /// Server host name
    #[serde(alias = "host")]
    #[validate(length(min = 1))]
    pub server: String,

    /// Server port (default: 1433)
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Database (catalog) holding the exposed relations
    #[validate(length(min = 1))]
    pub database: String,

    /// Restrict discovery to one schema
    #[serde(default)]
    pub schema: Option<String>,

    /// Compute warehouse, forwarded to backends that use one
    #[serde(default)]
    pub warehouse: Option<String>,

    /// Session role, forwarded to backends that use one
    #[serde(default)]
    pub role: Option<String>,

    /// Login name
    #[serde(default)]
    pub username: Option<String>,

    /// Login password
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Per-statement timeout in seconds (default: 30, 0 disables)
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,

    /// Connection timeout in seconds (default: 15)
    #[serde(default = "default_connection_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub connection_timeout: u64,

    /// Maximum concurrent sessions the backend may open (default: 1)
    #[serde(default = "default_max_sessions")]
    #[validate(range(min = 1, max = 64))]
    pub max_sessions: u32,

    /// Recycle the shared connection after this many idle seconds (default: 600)
    #[serde(default = "default_session_idle_timeout")]
    #[validate(range(min = 1))]
    pub session_idle_timeout: u64,

    /// Accept the server certificate without validation (default: false)
    #[serde(default)]
    pub trust_server_certificate: bool,
}

fn default_port() -> u16 {
    1433
}

fn default_query_timeout() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    15
}

fn default_max_sessions() -> u32 {
    1
}

fn default_session_idle_timeout() -> u64 {
    600
}

impl CrudConnectorConfig {
    /// Parse and validate a JSON-encoded parameter map
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid connection parameters: {}", e)))?;
        config.validated()
    }

    /// Parse and validate an already decoded parameter map
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::config(format!("invalid connection parameters: {}", e)))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid connection parameters: {}", e)))?;
        Ok(self)
    }

    /// Schema filter, `None` when unset or blank
    pub fn schema_filter(&self) -> Option<&str> {
        self.schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Idle time after which the shared connection is recycled
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout)
    }

    /// Driver-level configuration
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.server.clone(), self.database.clone())
            .with_connect_timeout(self.connection_timeout.saturating_mul(1000))
            .with_query_timeout(self.query_timeout.saturating_mul(1000))
            .with_property("max_sessions", self.max_sessions.to_string());

        config.port = self.port;
        config.username = self.username.clone();
        config.password = self.password.as_ref().map(|p| p.expose_secret().to_string());
        config.trust_cert = self.trust_server_certificate;

        if let Some(warehouse) = &self.warehouse {
            config = config.with_property("warehouse", warehouse.clone());
        }
        if let Some(role) = &self.role {
            config = config.with_property("role", role.clone());
        }
        config
    }
}
