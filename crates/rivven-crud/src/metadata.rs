//! Schema metadata cache for rivven-crud
//!
//! Provides:
//! - RelationMetadata / ColumnMetadata: what introspection found
//! - MetadataStore: TTL-governed cache, replaced atomically on refresh
//! - ExecutionKeys: per-relation memo of primary keys and identity column
//!
//! A refresh runs two queries (primary keys, then columns) and folds the
//! ordered column rows into relations by watching for relation-name changes.
//! If either query fails the previous snapshot stays in place.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Default time-to-live of a metadata snapshot (10 minutes)
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_millis(600_000);

/// Kind of relation, drives capability derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    /// Base table
    Table,
    /// View
    View,
    /// Anything else the catalog reports (synonyms, table-valued objects)
    Other,
}

impl RelationKind {
    /// Parse the catalog's relation type string
    pub fn from_catalog(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TABLE" | "BASE TABLE" | "USER_TABLE" => Self::Table,
            "VIEW" => Self::View,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "TABLE"),
            Self::View => write!(f, "VIEW"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    /// Column name, unique within its relation
    pub name: String,
    /// Vendor type name
    pub type_name: String,
    /// Part of the primary key
    pub is_primary_key: bool,
    /// Server-generated surrogate value
    pub is_identity: bool,
    /// Server-derived value
    pub is_computed: bool,
    /// Accepts NULL
    pub is_nullable: bool,
}

impl ColumnMetadata {
    /// Create a nullable, non-key column
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            is_primary_key: false,
            is_identity: false,
            is_computed: false,
            is_nullable: true,
        }
    }

    /// Mark as primary-key column (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    /// Mark as identity column (implies NOT NULL)
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self
    }

    /// Mark as computed column
    pub fn computed(mut self) -> Self {
        self.is_computed = true;
        self
    }

    /// Mark as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Whether callers may supply a value for this column
    #[inline]
    pub fn is_writable(&self) -> bool {
        !self.is_identity && !self.is_computed
    }
}

/// Table or view metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationMetadata {
    /// Database (catalog) the relation lives in
    pub catalog: String,
    /// Schema name
    pub schema: String,
    /// Relation name
    pub name: String,
    /// Table, view, ...
    pub kind: RelationKind,
    /// Columns in introspection order
    pub columns: Vec<ColumnMetadata>,
}

impl RelationMetadata {
    /// Create relation metadata without columns
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            catalog: String::new(),
            schema: schema.into(),
            name: name.into(),
            kind,
            columns: Vec::new(),
        }
    }

    /// Append a column (builder style)
    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Stable identifier `schema.table`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Get column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Primary-key columns in introspection order
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }

    /// Whether at least one primary-key column exists
    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// The identity column, if any
    pub fn identity_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_identity)
    }
}

/// Memoized execution keys of one relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionKeys {
    /// Primary-key column names
    pub primary_keys: Vec<String>,
    /// Identity column name
    pub identity_column: Option<String>,
}

impl ExecutionKeys {
    /// Derive from relation metadata
    pub fn from_relation(relation: &RelationMetadata) -> Self {
        Self {
            primary_keys: relation
                .primary_key_columns()
                .map(|c| c.name.clone())
                .collect(),
            identity_column: relation.identity_column().map(|c| c.name.clone()),
        }
    }
}

/// One complete, immutable metadata fill
#[derive(Debug)]
pub struct MetadataSnapshot {
    relations: Vec<RelationMetadata>,
    refreshed_at: Instant,
}

impl MetadataSnapshot {
    /// All relations, ordered by schema then name
    pub fn relations(&self) -> &[RelationMetadata] {
        &self.relations
    }

    /// When this snapshot was taken
    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }
}

/// TTL-governed metadata cache
#[derive(Debug)]
pub struct MetadataStore {
    ttl: Duration,
    snapshot: Option<Arc<MetadataSnapshot>>,
    execution_keys: HashMap<String, Arc<ExecutionKeys>>,
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_TTL)
    }
}

impl MetadataStore {
    /// Create an empty store with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: None,
            execution_keys: HashMap::new(),
        }
    }

    /// Configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether a snapshot exists and is younger than the TTL
    pub fn is_fresh(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.refreshed_at.elapsed() <= self.ttl)
    }

    /// Current snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<MetadataSnapshot>> {
        self.snapshot.clone()
    }

    /// Refresh when stale or when `force` is set. Returns whether a refresh ran.
    ///
    /// On failure the previous snapshot is kept and the error is returned.
    pub async fn ensure_fresh(
        &mut self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        schema: Option<&str>,
        force: bool,
    ) -> Result<bool> {
        if !force && self.is_fresh() {
            return Ok(false);
        }

        let started = Instant::now();
        let relations = match introspect(conn, dialect, schema).await {
            Ok(relations) => relations,
            Err(e) => {
                warn!(error = %e, "Schema introspection failed, keeping previous snapshot");
                return Err(e);
            }
        };

        info!(
            relations = relations.len(),
            schema = schema.unwrap_or("*"),
            forced = force,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refreshed schema metadata"
        );

        self.snapshot = Some(Arc::new(MetadataSnapshot {
            relations,
            refreshed_at: Instant::now(),
        }));
        self.execution_keys.clear();
        Ok(true)
    }

    /// Look up a relation by full name. Never triggers a refresh.
    pub fn lookup(&self, full_name: &str) -> Option<&RelationMetadata> {
        let relations = self.relations();
        relations
            .iter()
            .find(|r| r.full_name() == full_name)
            .or_else(|| {
                relations
                    .iter()
                    .find(|r| r.full_name().eq_ignore_ascii_case(full_name))
            })
    }

    /// All relations of the current snapshot (empty before the first fill)
    pub fn relations(&self) -> &[RelationMetadata] {
        self.snapshot
            .as_deref()
            .map(MetadataSnapshot::relations)
            .unwrap_or(&[])
    }

    /// Memoized execution keys for a relation
    pub fn execution_keys(&mut self, relation: &RelationMetadata) -> Arc<ExecutionKeys> {
        self.execution_keys
            .entry(relation.full_name())
            .or_insert_with(|| Arc::new(ExecutionKeys::from_relation(relation)))
            .clone()
    }

    /// Drop the snapshot and every memoized key set
    pub fn invalidate(&mut self) {
        if self.snapshot.take().is_some() {
            debug!("Schema metadata invalidated");
        }
        self.execution_keys.clear();
    }
}

type PrimaryKeySet = HashSet<(String, String, String, String)>;

async fn introspect(
    conn: &dyn Connection,
    dialect: &dyn SqlDialect,
    schema: Option<&str>,
) -> Result<Vec<RelationMetadata>> {
    let pk_rows = conn
        .query(&dialect.primary_keys_sql(), &[])
        .await
        .map_err(|e| Error::schema_introspection_with_source("primary key discovery failed", e))?;

    let params: Vec<Value> = schema.map(Value::from).into_iter().collect();
    let column_rows = conn
        .query(&dialect.columns_sql(schema.is_some()), &params)
        .await
        .map_err(|e| Error::schema_introspection_with_source("column discovery failed", e))?;

    let primary_keys = collect_primary_keys(&pk_rows)?;
    fold_relations(&column_rows, &primary_keys)
}

fn collect_primary_keys(rows: &[Row]) -> Result<PrimaryKeySet> {
    rows.iter()
        .map(|row| {
            Ok((
                text(row, "catalog_name")?,
                text(row, "schema_name")?,
                text(row, "table_name")?,
                text(row, "column_name")?,
            ))
        })
        .collect()
}

/// Fold column rows, ordered by relation, into relation records.
///
/// A row whose `(schema, relation)` differs from the accumulator's closes the
/// current record and opens the next one.
fn fold_relations(rows: &[Row], primary_keys: &PrimaryKeySet) -> Result<Vec<RelationMetadata>> {
    let mut relations: Vec<RelationMetadata> = Vec::new();
    let mut current: Option<RelationMetadata> = None;

    for row in rows {
        let catalog = text(row, "catalog_name")?;
        let schema = text(row, "schema_name")?;
        let name = text(row, "relation_name")?;

        let same_relation = current
            .as_ref()
            .is_some_and(|r| r.schema == schema && r.name == name);
        if !same_relation {
            relations.extend(current.take());
            let kind = RelationKind::from_catalog(&text(row, "relation_type")?);
            let mut relation = RelationMetadata::new(schema.clone(), name.clone(), kind);
            relation.catalog = catalog.clone();
            current = Some(relation);
        }

        let column_name = text(row, "column_name")?;
        let key = (catalog, schema, name, column_name.clone());
        let column = ColumnMetadata {
            is_primary_key: primary_keys.contains(&key),
            name: column_name,
            type_name: text(row, "type_name")?,
            is_identity: flag(row, "is_identity")?,
            is_computed: flag(row, "is_computed")?,
            is_nullable: flag(row, "is_nullable")?,
        };

        if let Some(relation) = current.as_mut() {
            relation.columns.push(column);
        }
    }

    relations.extend(current);
    Ok(relations)
}

fn text(row: &Row, column: &str) -> Result<String> {
    match row.get_by_name(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::schema_introspection(format!(
            "column {} has unexpected type {}",
            column,
            other.sql_type()
        ))),
        None => Err(Error::schema_introspection(format!(
            "introspection row is missing column {}",
            column
        ))),
    }
}

fn flag(row: &Row, column: &str) -> Result<bool> {
    row.get_by_name(column)
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            Error::schema_introspection(format!("column {} is not a boolean flag", column))
        })
}
