//! Operation capability derivation
//!
//! Pure functions from relation metadata to:
//! - the discovery table (one row per relation x supported operation)
//! - the parameter contract of one operation on one relation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::metadata::{ColumnMetadata, RelationKind, RelationMetadata};

/// Read parameter: toggle `SELECT DISTINCT`
pub const SELECT_DISTINCT: &str = "select_distinct";
/// Read parameter: raw SQL predicate appended after `WHERE`
pub const WHERE_CLAUSE: &str = "where_clause";
/// Read parameter: projected columns, empty for all
pub const SELECTED_COLUMNS: &str = "selected_columns";
/// Name of the catch-all parameter standing for "any other name"
pub const CATCH_ALL: &str = "*";

/// CRUD operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Insert one row
    Create,
    /// Select rows
    Read,
    /// Update one row by primary key
    Update,
    /// Delete one row by primary key
    Delete,
}

impl Operation {
    /// All operations in CRUD order
    pub const ALL: [Operation; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Operation name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Whether the operation writes
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::invalid_parameter("operation", format!("unknown operation '{}'", s))
            })
    }
}

/// One row of the discovery table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDescriptor {
    /// Relation full name (`schema.table`)
    pub relation: String,
    /// Supported operation
    pub operation: Operation,
    /// Relation kind
    pub source_type: RelationKind,
    /// Primary-key columns joined with `", "`
    pub primary_keys: String,
    /// Capability string, present on `Read` rows only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,
}

/// Operations a relation supports, in CRUD order
pub fn supported_operations(relation: &RelationMetadata) -> Vec<Operation> {
    match relation.kind {
        RelationKind::Table if relation.has_primary_key() => Operation::ALL.to_vec(),
        RelationKind::Table => vec![Operation::Create, Operation::Read],
        _ => vec![Operation::Read],
    }
}

/// Capability string: `R` for views, `CR` for keyless tables, `CRUD` otherwise
pub fn capability_string(relation: &RelationMetadata) -> String {
    match relation.kind {
        RelationKind::Table => {
            let mut caps = String::from("CR");
            if relation.has_primary_key() {
                caps.push_str("UD");
            }
            caps
        }
        _ => "R".to_string(),
    }
}

/// Whether `operation` is supported by `relation`
pub fn supports(relation: &RelationMetadata, operation: Operation) -> bool {
    supported_operations(relation).contains(&operation)
}

/// Build the discovery table for all relations
pub fn discover(relations: &[RelationMetadata]) -> Vec<OperationDescriptor> {
    relations
        .iter()
        .flat_map(|relation| {
            let primary_keys = relation
                .primary_key_columns()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let capabilities = capability_string(relation);

            supported_operations(relation)
                .into_iter()
                .map(move |operation| OperationDescriptor {
                    relation: relation.full_name(),
                    operation,
                    source_type: relation.kind,
                    primary_keys: primary_keys.clone(),
                    capabilities: (operation == Operation::Read).then(|| capabilities.clone()),
                })
        })
        .collect()
}

/// Whether a parameter must, may or must not be supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allowance {
    /// Required
    Mandatory,
    /// May be omitted
    Optional,
    /// Rejected when supplied
    Prohibited,
}

/// Shape of a parameter's value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Value for a relation column
    Column {
        /// Vendor type name
        type_name: String,
    },
    /// `true` / `false`
    Boolean,
    /// Free text
    Text,
    /// Multi-select over the relation's columns
    ColumnList {
        /// Selectable columns
        options: Vec<ColumnOption>,
    },
    /// Stands for every name not listed in the contract
    CatchAll,
}

/// Selectable column of a `ColumnList` parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnOption {
    /// Column name
    pub name: String,
    /// Human-readable tag, e.g. `Primary key | Generated`
    pub tag: String,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDescriptor {
    /// Parameter name
    pub name: String,
    /// Value shape
    #[serde(flatten)]
    pub kind: ParameterKind,
    /// Mandatory / optional / prohibited
    pub allowance: Allowance,
    /// Human-readable description
    pub description: String,
    /// Default value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterDescriptor {
    fn new(name: impl Into<String>, kind: ParameterKind, allowance: Allowance) -> Self {
        Self {
            name: name.into(),
            kind,
            allowance,
            description: String::new(),
            default: None,
        }
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    fn column(column: &ColumnMetadata, allowance: Allowance) -> Self {
        Self::new(
            column.name.clone(),
            ParameterKind::Column {
                type_name: column.type_name.clone(),
            },
            allowance,
        )
        .describe(column_tag(column))
    }
}

/// Parameter contract of one operation on one relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterContract {
    /// Relation full name
    pub relation: String,
    /// Operation
    pub operation: Operation,
    /// Declared parameters
    pub parameters: Vec<ParameterDescriptor>,
}

impl ParameterContract {
    /// Find a parameter by name (case-insensitive)
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Allowance of a parameter, if declared
    pub fn allowance(&self, name: &str) -> Option<Allowance> {
        self.parameter(name).map(|p| p.allowance)
    }
}

/// Tag composed from the column's flags, joined with `" | "`
pub fn column_tag(column: &ColumnMetadata) -> String {
    let flags = [
        (column.is_primary_key, "Primary key"),
        (column.is_identity, "Generated"),
        (column.is_computed, "Computed"),
        (column.is_nullable, "Nullable"),
    ];
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, label)| *label)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Derive the parameter contract of `operation` on `relation`
pub fn contract(relation: &RelationMetadata, operation: Operation) -> Result<ParameterContract> {
    if !supports(relation, operation) {
        return Err(Error::unsupported(relation.full_name(), operation));
    }

    let parameters = match operation {
        Operation::Create => relation
            .columns
            .iter()
            .map(|c| {
                let allowance = if !c.is_writable() {
                    Allowance::Prohibited
                } else if !c.is_nullable {
                    Allowance::Mandatory
                } else {
                    Allowance::Optional
                };
                ParameterDescriptor::column(c, allowance)
            })
            .collect(),
        Operation::Read => read_parameters(relation),
        Operation::Update => {
            let mut params: Vec<_> = relation
                .columns
                .iter()
                .map(|c| {
                    let allowance = if c.is_primary_key {
                        Allowance::Mandatory
                    } else if !c.is_writable() {
                        Allowance::Prohibited
                    } else {
                        Allowance::Optional
                    };
                    ParameterDescriptor::column(c, allowance)
                })
                .collect();
            params.push(catch_all());
            params
        }
        Operation::Delete => {
            let mut params: Vec<_> = relation
                .primary_key_columns()
                .map(|c| ParameterDescriptor::column(c, Allowance::Mandatory))
                .collect();
            params.push(catch_all());
            params
        }
    };

    Ok(ParameterContract {
        relation: relation.full_name(),
        operation,
        parameters,
    })
}

fn read_parameters(relation: &RelationMetadata) -> Vec<ParameterDescriptor> {
    let options: Vec<ColumnOption> = relation
        .columns
        .iter()
        .map(|c| ColumnOption {
            name: c.name.clone(),
            tag: column_tag(c),
        })
        .collect();
    let all_columns = serde_json::Value::Array(
        options
            .iter()
            .map(|o| serde_json::Value::String(o.name.clone()))
            .collect(),
    );

    vec![
        ParameterDescriptor::new(SELECT_DISTINCT, ParameterKind::Boolean, Allowance::Optional)
            .describe("Return distinct rows only")
            .with_default(serde_json::Value::Bool(false)),
        ParameterDescriptor::new(WHERE_CLAUSE, ParameterKind::Text, Allowance::Optional)
            .describe("SQL predicate appended verbatim after WHERE"),
        ParameterDescriptor::new(
            SELECTED_COLUMNS,
            ParameterKind::ColumnList { options },
            Allowance::Optional,
        )
        .describe("Columns to return, all when empty")
        .with_default(all_columns),
    ]
}

fn catch_all() -> ParameterDescriptor {
    ParameterDescriptor::new(CATCH_ALL, ParameterKind::CatchAll, Allowance::Prohibited)
        .describe("Parameters not listed above are rejected")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> RelationMetadata {
        RelationMetadata::new("sales", "orders", RelationKind::Table)
            .with_column(ColumnMetadata::new("id", "int").primary_key().identity())
            .with_column(ColumnMetadata::new("customer_id", "int").not_null())
            .with_column(ColumnMetadata::new("total", "decimal"))
            .with_column(ColumnMetadata::new("total_with_tax", "decimal").computed())
    }

    #[test]
    fn test_operation_parsing() {
        assert_eq!("read".parse::<Operation>().unwrap(), Operation::Read);
        assert_eq!(" DELETE ".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("merge".parse::<Operation>().is_err());
        assert_eq!(Operation::Update.to_string(), "Update");
    }

    #[test]
    fn test_capability_strings() {
        assert_eq!(capability_string(&orders()), "CRUD");

        let keyless = RelationMetadata::new("sales", "audit", RelationKind::Table)
            .with_column(ColumnMetadata::new("msg", "nvarchar"));
        assert_eq!(capability_string(&keyless), "CR");

        let view = RelationMetadata::new("sales", "v_orders", RelationKind::View);
        assert_eq!(capability_string(&view), "R");
    }

    #[test]
    fn test_discover_annotates_read_rows_only() {
        let rows = discover(&[orders()]);
        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert_eq!(row.primary_keys, "id");
            assert_eq!(row.source_type, RelationKind::Table);
            if row.operation == Operation::Read {
                assert_eq!(row.capabilities.as_deref(), Some("CRUD"));
            } else {
                assert!(row.capabilities.is_none());
            }
        }
    }

    #[test]
    fn test_column_tags() {
        let rel = orders();
        assert_eq!(column_tag(rel.column("id").unwrap()), "Primary key | Generated");
        assert_eq!(column_tag(rel.column("total").unwrap()), "Nullable");
        assert_eq!(
            column_tag(rel.column("total_with_tax").unwrap()),
            "Computed | Nullable"
        );
        assert_eq!(column_tag(rel.column("customer_id").unwrap()), "");
    }

    #[test]
    fn test_create_contract() {
        let c = contract(&orders(), Operation::Create).unwrap();
        assert_eq!(c.allowance("id"), Some(Allowance::Prohibited));
        assert_eq!(c.allowance("total_with_tax"), Some(Allowance::Prohibited));
        assert_eq!(c.allowance("customer_id"), Some(Allowance::Mandatory));
        assert_eq!(c.allowance("total"), Some(Allowance::Optional));
        assert!(c.parameter(CATCH_ALL).is_none());
    }

    #[test]
    fn test_read_contract() {
        let c = contract(&orders(), Operation::Read).unwrap();
        let names: Vec<_> = c.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![SELECT_DISTINCT, WHERE_CLAUSE, SELECTED_COLUMNS]);

        let columns = c.parameter(SELECTED_COLUMNS).unwrap();
        match &columns.kind {
            ParameterKind::ColumnList { options } => {
                assert_eq!(options.len(), 4);
                assert_eq!(options[0].tag, "Primary key | Generated");
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(
            columns.default,
            Some(serde_json::json!(["id", "customer_id", "total", "total_with_tax"]))
        );
    }

    #[test]
    fn test_update_and_delete_contracts() {
        let update = contract(&orders(), Operation::Update).unwrap();
        assert_eq!(update.allowance("id"), Some(Allowance::Mandatory));
        assert_eq!(update.allowance("total"), Some(Allowance::Optional));
        assert_eq!(update.allowance(CATCH_ALL), Some(Allowance::Prohibited));

        let delete = contract(&orders(), Operation::Delete).unwrap();
        assert_eq!(delete.parameters.len(), 2);
        assert_eq!(delete.allowance("id"), Some(Allowance::Mandatory));
        assert_eq!(delete.allowance(CATCH_ALL), Some(Allowance::Prohibited));
        assert!(delete.parameter("total").is_none());
    }

    #[test]
    fn test_unsupported_contracts() {
        let view = RelationMetadata::new("sales", "v_orders", RelationKind::View)
            .with_column(ColumnMetadata::new("id", "int"));
        let err = contract(&view, Operation::Create).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
        assert!(contract(&view, Operation::Read).is_ok());
    }
}
