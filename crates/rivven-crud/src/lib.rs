//! # rivven-crud
//!
//! Schema-driven CRUD connector for the Rivven platform.
//!
//! Exposes every table and view of a relational database as a discoverable
//! resource. Nothing is resource-specific: relations, columns, keys and
//! generated columns are introspected from the live catalog, and the
//! supported operations and their parameters are derived from that.
//!
//! ## Features
//!
//! - **Schema Discovery**: tables and views with primary-key, identity and computed flags
//! - **Metadata Cache**: TTL-governed, atomically replaced, invalidated on reconnect
//! - **Capability Derivation**: `R` for views, `CR` for keyless tables, `CRUD` otherwise
//! - **Statement Synthesis**: bound parameters for every value, single-row writes echoed back
//! - **Streaming Reads**: lazy, single-pass row sequences straight off the driver
//! - **Audit Logging**: one-line literal rendering of every executed statement
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_crud::prelude::*;
//!
//! let config = CrudConnectorConfig::from_json(r#"{"server": "db", "database": "shop"}"#)?;
//! let connector = CrudConnector::builder().build()?;
//!
//! for row in connector.discover(&config).await? {
//!     println!("{} {}", row.relation, row.operation);
//! }
//!
//! let params = serde_json::json!({"where_clause": "total > 50"});
//! let outcome = connector
//!     .execute(&config, "sales.orders", Operation::Read, params.as_object().unwrap())
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlserver` (default) - SQL Server support via tiberius

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod binder;
pub mod capability;
pub mod config;
pub mod connection;
pub mod connector;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod security;
pub mod spec;
pub mod statement;
pub mod testing;
pub mod types;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{Row, Value};

    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, ConnectionLifecycle, RowStream,
    };

    pub use crate::dialect::{SqlDialect, SqlServerDialect};

    pub use crate::metadata::{
        ColumnMetadata, ExecutionKeys, MetadataStore, RelationKind, RelationMetadata,
    };

    pub use crate::capability::{
        Allowance, Operation, OperationDescriptor, ParameterContract, ParameterDescriptor,
        ParameterKind,
    };

    pub use crate::binder::{BoundParameter, SynthesizedStatement};
    pub use crate::statement::{CrudRequest, ReadRequest, StatementSynthesizer};
    pub use crate::executor::{ExecutionAdapter, ExecutionOutcome, RowSequence};

    pub use crate::config::{CrudConnectorConfig, SensitiveString};
    pub use crate::spec::{ConfigField, FieldType};
    pub use crate::connector::{
        ConnectorRequest, ConnectorResponse, CrudConnector, CrudConnectorBuilder,
    };

    #[cfg(feature = "sqlserver")]
    pub use crate::sqlserver::{SqlServerConnection, SqlServerConnectionFactory};
}

pub use connector::CrudConnector;
pub use error::{Error, Result};
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("localhost", "shop");
        let _kind = RelationKind::Table;
        let _op = Operation::Read;
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_builder_without_factory() {
        let connector = CrudConnector::builder().build();
        assert_eq!(connector.is_ok(), cfg!(feature = "sqlserver"));
    }
}
