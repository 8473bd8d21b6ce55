//! Connection-field descriptors
//!
//! The orchestrator renders its configuration form from `connection_fields()`;
//! `config_schema()` is the same information as JSON Schema.

use serde::{Deserialize, Serialize};

use crate::config::CrudConnectorConfig;

/// Value type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free text
    String,
    /// Masked text
    Password,
    /// Whole number
    Integer,
    /// `true` / `false`
    Boolean,
}

/// One configuration field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Parameter name as accepted by `CrudConnectorConfig`
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Form label
    pub label: String,
    /// Help text
    pub description: String,
    /// Default value, serialized as `null` when the field has none
    pub default: Option<serde_json::Value>,
}

impl ConfigField {
    fn new(name: &str, field_type: FieldType, label: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            label: label.to_string(),
            description: description.to_string(),
            default: None,
        }
    }

    fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Ordered configuration fields
pub fn connection_fields() -> Vec<ConfigField> {
    use serde_json::json;

    vec![
        ConfigField::new("server", FieldType::String, "Server", "Database server host name"),
        ConfigField::new("port", FieldType::Integer, "Port", "Database server port")
            .default_value(json!(1433)),
        ConfigField::new(
            "database",
            FieldType::String,
            "Database",
            "Database holding the exposed tables and views",
        ),
        ConfigField::new(
            "schema",
            FieldType::String,
            "Schema",
            "Only expose relations of this schema (all when empty)",
        ),
        ConfigField::new(
            "warehouse",
            FieldType::String,
            "Warehouse",
            "Compute warehouse, for backends that use one",
        ),
        ConfigField::new(
            "role",
            FieldType::String,
            "Role",
            "Session role, for backends that use one",
        ),
        ConfigField::new("username", FieldType::String, "Username", "Login name"),
        ConfigField::new("password", FieldType::Password, "Password", "Login password"),
        ConfigField::new(
            "query_timeout",
            FieldType::Integer,
            "Query timeout",
            "Per-statement timeout in seconds, 0 disables",
        )
        .default_value(json!(30)),
        ConfigField::new(
            "connection_timeout",
            FieldType::Integer,
            "Connection timeout",
            "Connection timeout in seconds",
        )
        .default_value(json!(15)),
        ConfigField::new(
            "max_sessions",
            FieldType::Integer,
            "Max sessions",
            "Maximum concurrent sessions",
        )
        .default_value(json!(1)),
        ConfigField::new(
            "session_idle_timeout",
            FieldType::Integer,
            "Session idle timeout",
            "Reopen the connection after this many idle seconds",
        )
        .default_value(json!(600)),
        ConfigField::new(
            "trust_server_certificate",
            FieldType::Boolean,
            "Trust server certificate",
            "Skip TLS certificate validation",
        )
        .default_value(json!(false)),
    ]
}

/// JSON Schema of `CrudConnectorConfig`
pub fn config_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(CrudConnectorConfig);
    serde_json::to_value(schema).unwrap_or_default()
}
