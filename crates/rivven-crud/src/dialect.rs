//! SQL dialect abstraction for rivven-crud
//!
//! The synthesizer builds statements from dialect pieces:
//! - Identifier rendering (relations bare when plain, columns always quoted)
//! - Driver placeholders for bound parameters
//! - Single-row restriction for UPDATE / DELETE
//! - Server-generated identity lookup after INSERT
//! - Catalog introspection queries

use crate::security::{quote_identifier, render_identifier};

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote a column identifier
    fn quote_column(&self, name: &str) -> String;

    /// Render a schema-qualified relation name
    fn relation_name(&self, schema: &str, name: &str) -> String;

    /// Driver placeholder for the parameter at 1-based `index`
    fn placeholder(&self, index: usize) -> String;

    /// Expression for a NULL bound to a column of `type_name`. Drivers bind
    /// NULL with a fixed parameter type, which some column types reject.
    fn null_parameter(&self, token: &str, type_name: &str) -> String {
        let _ = type_name;
        token.to_string()
    }

    /// Expression yielding the identity value generated by the last INSERT in scope
    fn last_identity(&self) -> &'static str;

    /// `UPDATE` head restricted to at most one row
    fn update_one(&self, relation: &str) -> String;

    /// `DELETE` head restricted to at most one row, echoing the deleted row.
    /// The caller appends the `WHERE` clause.
    fn delete_one(&self, relation: &str) -> String;

    /// Separator between statements of one batch
    fn statement_separator(&self) -> &'static str {
        ";\n"
    }

    /// Query listing `(catalog, schema, table, column)` for every primary-key column
    fn primary_keys_sql(&self) -> String;

    /// Query listing one row per `(relation, column)` of every table and view,
    /// ordered by schema, relation name and column name. With
    /// `schema_filter`, the query takes the schema name as its first parameter.
    fn columns_sql(&self, schema_filter: bool) -> String;
}

/// SQL Server (T-SQL) dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_column(&self, name: &str) -> String {
        quote_identifier(name)
    }

    fn relation_name(&self, schema: &str, name: &str) -> String {
        format!("{}.{}", render_identifier(schema), render_identifier(name))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    // NULL travels as nvarchar, which never converts implicitly to binary
    fn null_parameter(&self, token: &str, type_name: &str) -> String {
        let binary = ["binary", "varbinary", "image"]
            .iter()
            .any(|t| type_name.eq_ignore_ascii_case(t));
        if binary {
            format!("CAST({} AS varbinary(max))", token)
        } else {
            token.to_string()
        }
    }

    fn last_identity(&self) -> &'static str {
        "SCOPE_IDENTITY()"
    }

    fn update_one(&self, relation: &str) -> String {
        format!("UPDATE TOP (1) {}", relation)
    }

    fn delete_one(&self, relation: &str) -> String {
        format!("DELETE TOP (1) FROM {} OUTPUT DELETED.*", relation)
    }

    fn primary_keys_sql(&self) -> String {
        r#"SELECT
                kcu.TABLE_CATALOG AS catalog_name,
                kcu.TABLE_SCHEMA AS schema_name,
                kcu.TABLE_NAME AS table_name,
                kcu.COLUMN_NAME AS column_name
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
                ON tc.CONSTRAINT_CATALOG = kcu.CONSTRAINT_CATALOG
                AND tc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                AND tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'"#
            .to_string()
    }

    fn columns_sql(&self, schema_filter: bool) -> String {
        let filter = if schema_filter {
            format!(" AND s.name = {}", self.placeholder(1))
        } else {
            String::new()
        };

        format!(
            r#"SELECT
                DB_NAME() AS catalog_name,
                s.name AS schema_name,
                r.name AS relation_name,
                r.relation_type,
                c.name AS column_name,
                ty.name AS type_name,
                c.is_nullable,
                c.is_identity,
                c.is_computed
            FROM (
                SELECT object_id, schema_id, name, 'TABLE' AS relation_type FROM sys.tables
                UNION ALL
                SELECT object_id, schema_id, name, 'VIEW' AS relation_type FROM sys.views
            ) r
            JOIN sys.schemas s ON s.schema_id = r.schema_id
            JOIN sys.columns c ON c.object_id = r.object_id
            JOIN sys.types ty ON ty.user_type_id = c.user_type_id
            WHERE s.name NOT IN ('sys', 'INFORMATION_SCHEMA'){}
            ORDER BY s.name, r.name, c.name"#,
            filter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlserver_dialect() {
        let d = SqlServerDialect;
        assert_eq!(d.name(), "SQL Server");
        assert_eq!(d.quote_column("total"), "[total]");
        assert_eq!(d.placeholder(1), "@P1");
        assert_eq!(d.placeholder(12), "@P12");
    }

    #[test]
    fn test_null_parameter_casts_binary_columns() {
        let d = SqlServerDialect;
        assert_eq!(
            d.null_parameter("@param0_", "varbinary"),
            "CAST(@param0_ AS varbinary(max))"
        );
        assert_eq!(
            d.null_parameter("@param0_", "IMAGE"),
            "CAST(@param0_ AS varbinary(max))"
        );
        assert_eq!(d.null_parameter("@param0_", "nvarchar"), "@param0_");
        assert_eq!(d.null_parameter("@param0_", "int"), "@param0_");
    }

    #[test]
    fn test_relation_name_rendering() {
        let d = SqlServerDialect;
        assert_eq!(d.relation_name("sales", "orders"), "sales.orders");
        assert_eq!(
            d.relation_name("dbo", "Order Details"),
            "dbo.[Order Details]"
        );
    }

    #[test]
    fn test_single_row_heads() {
        let d = SqlServerDialect;
        assert_eq!(d.update_one("sales.orders"), "UPDATE TOP (1) sales.orders");
        assert_eq!(
            d.delete_one("sales.orders"),
            "DELETE TOP (1) FROM sales.orders OUTPUT DELETED.*"
        );
    }

    #[test]
    fn test_columns_sql_ordering_and_filter() {
        let d = SqlServerDialect;
        let unfiltered = d.columns_sql(false);
        assert!(unfiltered.contains("ORDER BY s.name, r.name, c.name"));
        assert!(unfiltered.contains("sys.views"));
        assert!(!unfiltered.contains("@P1"));

        let filtered = d.columns_sql(true);
        assert!(filtered.contains("AND s.name = @P1"));
    }

    #[test]
    fn test_primary_keys_sql() {
        let sql = SqlServerDialect.primary_keys_sql();
        assert!(sql.contains("'PRIMARY KEY'"));
        assert!(sql.contains("KEY_COLUMN_USAGE"));
    }
}
