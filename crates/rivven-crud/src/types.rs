//! Value types for rivven-crud
//!
//! `Value` is what flows between the orchestrator's JSON parameters and the
//! driver's bound parameters / result rows:
//! - JSON parameters decode into `Value` (`null` becomes an explicit `Value::Null`)
//! - Result rows encode back into JSON objects with every column present

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SQL value type that can hold any value the connector binds or reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value (BIT)
    Bool(bool),
    /// 16-bit signed integer (TINYINT, SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INT)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (FLOAT)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL, MONEY)
    Decimal(Decimal),
    /// Text string (VARCHAR, NVARCHAR, CHAR)
    String(String),
    /// Binary data (VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME2)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (DATETIMEOFFSET)
    DateTimeTz(DateTime<Utc>),
    /// UUID (UNIQUEIDENTIFIER)
    Uuid(Uuid),
    /// JSON object passed through from the caller
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value renders as a quoted literal (text, date and time types)
    pub const fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::String(_)
                | Self::Date(_)
                | Self::Time(_)
                | Self::DateTime(_)
                | Self::DateTimeTz(_)
                | Self::Uuid(_)
                | Self::Json(_)
        )
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INT",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "FLOAT",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "NVARCHAR",
            Self::Bytes(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeTz(_) => "DATETIMEOFFSET",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
            Self::Json(_) => "NVARCHAR",
            Self::Array(_) => "NVARCHAR",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Plain string form used for literal rendering
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Bytes(b) => Some(format!("0x{}", hex::encode(b))),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Json(j) => Some(j.to_string()),
            Self::Array(_) => Some(self.to_json().to_string()),
        }
    }

    /// Decode a JSON parameter value. `null` becomes an explicit `Value::Null`.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Decimal(Decimal::from(u))
                } else {
                    n.as_f64().map(Self::Float64).unwrap_or(Self::Null)
                }
            }
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(_) => Self::Json(json.clone()),
        }
    }

    /// Encode for the orchestrator. NULL stays an explicit JSON `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::json!(b),
            Self::Int16(n) => serde_json::json!(n),
            Self::Int32(n) => serde_json::json!(n),
            Self::Int64(n) => serde_json::json!(n),
            Self::Float32(n) => serde_json::json!(n),
            Self::Float64(n) => serde_json::json!(n),
            Self::Decimal(d) => serde_json::json!(d.to_string()),
            Self::String(s) => serde_json::json!(s),
            Self::Bytes(b) => {
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Date(d) => serde_json::json!(d.to_string()),
            Self::Time(t) => serde_json::json!(t.to_string()),
            Self::DateTime(dt) => serde_json::json!(dt.to_string()),
            Self::DateTimeTz(dt) => serde_json::json!(dt.to_rfc3339()),
            Self::Uuid(u) => serde_json::json!(u.to_string()),
            Self::Json(j) => j.clone(),
            Self::Array(arr) => serde_json::Value::Array(arr.iter().map(Self::to_json).collect()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Convert to a JSON object. NULL columns are kept as `null`, never elided.
    pub fn to_json(&self) -> serde_json::Value {
        let object: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}
