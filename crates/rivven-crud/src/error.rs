//! Error types for rivven-crud
//!
//! Every failure surfaces to the orchestrator. The categories mirror what the
//! connector can tell apart:
//! - Schema introspection failed (previous metadata snapshot stays in use)
//! - A key parameter was missing (nothing was executed)
//! - The driver rejected a statement (partial writes are not rolled back)
//! - The connection could not be (re)opened

use std::fmt;
use thiserror::Error;

/// Result type for rivven-crud operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Catalog discovery failed
    SchemaIntrospection,
    /// Update/Delete without the full primary key
    MissingKey,
    /// Statement execution failed in the driver
    Execution,
    /// Connection open/reopen failed
    Connection,
    /// Invalid connection parameters
    Configuration,
    /// Caller request does not match the relation's contract
    Request,
    /// Value conversion failed
    TypeConversion,
}

impl ErrorCategory {
    /// Whether a caller may retry the same request unchanged.
    ///
    /// Execution errors are not listed: statements are not idempotent
    /// (Create allocates identities), so only the orchestrator can judge.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::SchemaIntrospection)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaIntrospection => write!(f, "schema_introspection"),
            Self::MissingKey => write!(f, "missing_key"),
            Self::Execution => write!(f, "execution"),
            Self::Connection => write!(f, "connection"),
            Self::Configuration => write!(f, "configuration"),
            Self::Request => write!(f, "request"),
            Self::TypeConversion => write!(f, "type_conversion"),
        }
    }
}

/// Main error type for rivven-crud
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Primary-key or column discovery query failed
    #[error("schema introspection error: {message}")]
    SchemaIntrospection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Update/Delete invoked without every primary-key value
    #[error("missing key value(s) for {relation}: {}", .columns.join(", "))]
    MissingKey {
        relation: String,
        columns: Vec<String>,
    },

    /// Driver reported a failure while executing a statement
    #[error("execution error: {message}")]
    Execution {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Connection open/reopen failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Connection parameters are invalid
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Relation is not present in the metadata snapshot
    #[error("relation not found: {relation}")]
    RelationNotFound { relation: String },

    /// Relation does not support the requested operation
    #[error("operation {operation} is not supported by {relation}")]
    UnsupportedOperation { relation: String, operation: String },

    /// A request parameter violates the operation's contract
    #[error("invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Value conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SchemaIntrospection { .. } => ErrorCategory::SchemaIntrospection,
            Self::MissingKey { .. } => ErrorCategory::MissingKey,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::RelationNotFound { .. }
            | Self::UnsupportedOperation { .. }
            | Self::InvalidParameter { .. } => ErrorCategory::Request,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a schema introspection error
    pub fn schema_introspection(message: impl Into<String>) -> Self {
        Self::SchemaIntrospection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a schema introspection error wrapping the failed query's error
    pub fn schema_introspection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SchemaIntrospection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a missing key error
    pub fn missing_key(relation: impl Into<String>, columns: Vec<String>) -> Self {
        Self::MissingKey {
            relation: relation.into(),
            columns,
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create an execution error carrying the driver error and the audit SQL
    pub fn execution_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a relation-not-found error
    pub fn relation_not_found(relation: impl Into<String>) -> Self {
        Self::RelationNotFound {
            relation: relation.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(relation: impl Into<String>, operation: impl fmt::Display) -> Self {
        Self::UnsupportedOperation {
            relation: relation.into(),
            operation: operation.to_string(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }
}
