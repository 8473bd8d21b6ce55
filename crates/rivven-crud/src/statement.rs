//! Statement synthesis
//!
//! Turns a `(relation, CrudRequest)` pair into a `SynthesizedStatement`.
//! Identifiers come from cached metadata only; caller-supplied column names
//! are resolved against the relation first and rejected when unknown. Values
//! are always bound. The Read predicate is the one piece of caller text that
//! is concatenated verbatim.

use serde_json::Map;

use crate::binder::SynthesizedStatement;
use crate::capability::{Operation, SELECTED_COLUMNS, SELECT_DISTINCT, WHERE_CLAUSE};
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::metadata::{ColumnMetadata, ExecutionKeys, RelationMetadata};
use crate::types::Value;

/// Caller parameters as `(name, value)` pairs in request order
pub type ParameterValues = Vec<(String, Value)>;

/// Parsed Read parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Prefix the projection with `DISTINCT`
    pub select_distinct: bool,
    /// Raw SQL predicate, appended verbatim after `WHERE`
    pub where_clause: Option<String>,
    /// Projected columns in caller order, empty for `*`
    pub selected_columns: Vec<String>,
}

impl ReadRequest {
    fn from_parameters(params: &Map<String, serde_json::Value>) -> Result<Self> {
        let select_distinct = match params.get(SELECT_DISTINCT) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => {
                return Err(Error::invalid_parameter(SELECT_DISTINCT, "expected a boolean"))
            }
        };

        let where_clause = match params.get(WHERE_CLAUSE) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Some(_) => return Err(Error::invalid_parameter(WHERE_CLAUSE, "expected a string")),
        };

        let selected_columns = match params.get(SELECTED_COLUMNS) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::invalid_parameter(SELECTED_COLUMNS, "expected column names")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            Some(_) => {
                return Err(Error::invalid_parameter(
                    SELECTED_COLUMNS,
                    "expected an array of column names or a comma-separated list",
                ))
            }
        };

        Ok(Self {
            select_distinct,
            where_clause,
            selected_columns,
        })
    }
}

/// A CRUD request, one variant per operation
#[derive(Debug, Clone, PartialEq)]
pub enum CrudRequest {
    /// Insert the supplied column values
    Create(ParameterValues),
    /// Select with optional projection, distinct and predicate
    Read(ReadRequest),
    /// Update the row identified by the primary-key values
    Update(ParameterValues),
    /// Delete the row identified by the primary-key values
    Delete(ParameterValues),
}

impl CrudRequest {
    /// Build a request from the decoded JSON parameter map
    pub fn from_parameters(
        operation: Operation,
        params: &Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let values = || -> ParameterValues {
            params
                .iter()
                .map(|(name, value)| (name.clone(), Value::from_json(value)))
                .collect()
        };

        Ok(match operation {
            Operation::Create => Self::Create(values()),
            Operation::Read => Self::Read(ReadRequest::from_parameters(params)?),
            Operation::Update => Self::Update(values()),
            Operation::Delete => Self::Delete(values()),
        })
    }

    /// Operation of this request
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create(_) => Operation::Create,
            Self::Read(_) => Operation::Read,
            Self::Update(_) => Operation::Update,
            Self::Delete(_) => Operation::Delete,
        }
    }
}

/// Builds statements for one relation
pub struct StatementSynthesizer<'a> {
    dialect: &'a dyn SqlDialect,
    relation: &'a RelationMetadata,
    keys: &'a ExecutionKeys,
}

impl<'a> StatementSynthesizer<'a> {
    /// Create a synthesizer for `relation` using its memoized keys
    pub fn new(
        dialect: &'a dyn SqlDialect,
        relation: &'a RelationMetadata,
        keys: &'a ExecutionKeys,
    ) -> Self {
        Self {
            dialect,
            relation,
            keys,
        }
    }

    /// Synthesize the statement for `request`
    pub fn synthesize(&self, request: &CrudRequest) -> Result<SynthesizedStatement> {
        match request {
            CrudRequest::Create(values) => self.create(values),
            CrudRequest::Read(read) => self.read(read),
            CrudRequest::Update(values) => self.update(values),
            CrudRequest::Delete(values) => self.delete(values),
        }
    }

    fn relation_name(&self) -> String {
        self.dialect
            .relation_name(&self.relation.schema, &self.relation.name)
    }

    fn resolve(&self, name: &str) -> Result<&'a ColumnMetadata> {
        self.relation.column(name).ok_or_else(|| {
            Error::invalid_parameter(
                name,
                format!("no such column in {}", self.relation.full_name()),
            )
        })
    }

    /// Resolve every supplied name to its column, rejecting unknown and duplicate names
    fn resolve_all<'v>(
        &self,
        values: &'v [(String, Value)],
    ) -> Result<Vec<(&'a ColumnMetadata, &'v Value)>> {
        let mut resolved: Vec<(&ColumnMetadata, &Value)> = Vec::with_capacity(values.len());
        for (name, value) in values {
            let column = self.resolve(name)?;
            if resolved.iter().any(|(c, _)| c.name == column.name) {
                return Err(Error::invalid_parameter(name, "column supplied more than once"));
            }
            resolved.push((column, value));
        }
        Ok(resolved)
    }

    /// Fail with `MissingKey` unless every primary-key column has a non-null value
    fn require_keys(&self, resolved: &[(&ColumnMetadata, &Value)]) -> Result<()> {
        let missing: Vec<String> = self
            .keys
            .primary_keys
            .iter()
            .filter(|pk| {
                !resolved
                    .iter()
                    .any(|(c, v)| &c.name == *pk && !v.is_null())
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::missing_key(self.relation.full_name(), missing))
        }
    }

    fn projection(&self, columns: &[String], distinct: bool) -> Result<String> {
        let list = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|name| Ok(self.dialect.quote_column(&self.resolve(name)?.name)))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };
        Ok(if distinct {
            format!("DISTINCT {}", list)
        } else {
            list
        })
    }

    /// `[a] = @param0_ AND [b] IS NULL ...` over the given column/token pairs
    fn equality_filter(&self, terms: &[(&ColumnMetadata, Option<&str>)]) -> String {
        terms
            .iter()
            .map(|(column, token)| match token {
                Some(token) => format!("{} = {}", self.dialect.quote_column(&column.name), token),
                None => format!("{} IS NULL", self.dialect.quote_column(&column.name)),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Bind `value` for `column` and return the expression that carries it
    fn bind_value(
        &self,
        stmt: &mut SynthesizedStatement,
        column: &ColumnMetadata,
        value: &Value,
    ) -> String {
        let token = stmt.bind(value.clone());
        if value.is_null() {
            self.dialect.null_parameter(&token, &column.type_name)
        } else {
            token
        }
    }

    fn create(&self, values: &[(String, Value)]) -> Result<SynthesizedStatement> {
        let resolved = self.resolve_all(values)?;
        if let Some((column, _)) = resolved.iter().find(|(c, _)| !c.is_writable()) {
            return Err(Error::invalid_parameter(
                column.name.as_str(),
                "identity and computed columns cannot be written",
            ));
        }

        let relation = self.relation_name();
        let mut stmt = SynthesizedStatement::new();
        let mut bound: Vec<(&ColumnMetadata, Option<String>)> = Vec::with_capacity(resolved.len());

        if resolved.is_empty() {
            stmt.push_sql(&format!("INSERT INTO {} DEFAULT VALUES", relation));
        } else {
            let columns: Vec<String> = resolved
                .iter()
                .map(|(c, _)| self.dialect.quote_column(&c.name))
                .collect();
            let mut tokens = Vec::with_capacity(resolved.len());
            for (column, value) in &resolved {
                let expr = self.bind_value(&mut stmt, column, value);
                bound.push((column, (!value.is_null()).then(|| expr.clone())));
                tokens.push(expr);
            }
            stmt.push_sql(&format!(
                "INSERT INTO {} ({})\nVALUES ({})",
                relation,
                columns.join(", "),
                tokens.join(", ")
            ));
        }

        let filter = match &self.keys.identity_column {
            Some(identity) => Some(format!(
                "{} = {}",
                self.dialect.quote_column(identity),
                self.dialect.last_identity()
            )),
            None => {
                let pk_terms: Vec<_> = self
                    .keys
                    .primary_keys
                    .iter()
                    .filter_map(|pk| bound.iter().find(|(c, t)| &c.name == pk && t.is_some()))
                    .map(|(c, t)| (*c, t.as_deref()))
                    .collect();

                let terms: Vec<_> = if !self.keys.primary_keys.is_empty()
                    && pk_terms.len() == self.keys.primary_keys.len()
                {
                    pk_terms
                } else {
                    bound.iter().map(|(c, t)| (*c, t.as_deref())).collect()
                };

                (!terms.is_empty()).then(|| self.equality_filter(&terms))
            }
        };

        if let Some(filter) = filter {
            stmt.push_sql(self.dialect.statement_separator());
            stmt.push_sql(&format!(
                "SELECT {} FROM {} WHERE {}",
                self.projection(&[], false)?,
                relation,
                filter
            ));
        }

        Ok(stmt)
    }

    fn read(&self, request: &ReadRequest) -> Result<SynthesizedStatement> {
        let mut stmt = SynthesizedStatement::new();
        stmt.push_sql(&format!(
            "SELECT {} FROM {}",
            self.projection(&request.selected_columns, request.select_distinct)?,
            self.relation_name()
        ));
        if let Some(predicate) = &request.where_clause {
            stmt.push_sql(&format!(" WHERE {}", predicate));
        }
        Ok(stmt)
    }

    fn update(&self, values: &[(String, Value)]) -> Result<SynthesizedStatement> {
        let resolved = self.resolve_all(values)?;
        self.require_keys(&resolved)?;

        let (keys, sets): (Vec<_>, Vec<_>) = resolved
            .iter()
            .partition(|(c, _)| self.keys.primary_keys.contains(&c.name));

        if let Some((column, _)) = sets.iter().find(|(c, _)| !c.is_writable()) {
            return Err(Error::invalid_parameter(
                column.name.as_str(),
                "identity and computed columns cannot be updated",
            ));
        }
        if sets.is_empty() {
            return Err(Error::invalid_parameter(
                "*",
                format!("no updatable column supplied for {}", self.relation.full_name()),
            ));
        }

        let relation = self.relation_name();
        let mut stmt = SynthesizedStatement::new();

        let assignments: Vec<String> = sets
            .iter()
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    self.dialect.quote_column(&column.name),
                    self.bind_value(&mut stmt, column, value)
                )
            })
            .collect();

        let key_tokens: Vec<(String, String)> = keys
            .iter()
            .map(|(column, value)| (column.name.clone(), stmt.bind((*value).clone())))
            .collect();
        let terms: Vec<(&ColumnMetadata, Option<&str>)> = keys
            .iter()
            .zip(key_tokens.iter())
            .map(|((column, _), (_, token))| (*column, Some(token.as_str())))
            .collect();
        let filter = self.equality_filter(&terms);

        let echo: Vec<String> = resolved.iter().map(|(c, _)| c.name.clone()).collect();

        stmt.push_sql(&format!(
            "{} SET {}\nWHERE {}",
            self.dialect.update_one(&relation),
            assignments.join(", "),
            filter
        ));
        stmt.push_sql(self.dialect.statement_separator());
        stmt.push_sql(&format!(
            "SELECT {} FROM {} WHERE {}",
            self.projection(&echo, false)?,
            relation,
            filter
        ));

        Ok(stmt)
    }

    fn delete(&self, values: &[(String, Value)]) -> Result<SynthesizedStatement> {
        let resolved = self.resolve_all(values)?;
        self.require_keys(&resolved)?;

        if let Some((column, _)) = resolved
            .iter()
            .find(|(c, _)| !self.keys.primary_keys.contains(&c.name))
        {
            return Err(Error::invalid_parameter(
                column.name.as_str(),
                "only primary-key columns are accepted by Delete",
            ));
        }

        let mut stmt = SynthesizedStatement::new();
        let tokens: Vec<String> = resolved
            .iter()
            .map(|(_, value)| stmt.bind((*value).clone()))
            .collect();
        let terms: Vec<(&ColumnMetadata, Option<&str>)> = resolved
            .iter()
            .zip(tokens.iter())
            .map(|((column, _), token)| (*column, Some(token.as_str())))
            .collect();

        stmt.push_sql(&format!(
            "{}\nWHERE {}",
            self.dialect.delete_one(&self.relation_name()),
            self.equality_filter(&terms)
        ));
        Ok(stmt)
    }
}
