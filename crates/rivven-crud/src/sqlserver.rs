//! SQL Server backend for rivven-crud
//!
//! Uses tiberius over a tokio TCP stream. Values are bound as typed TDS
//! parameters, never interpolated. Reads stream rows straight off the wire:
//! the returned stream holds the client until it is dropped or drained, and
//! nothing on the connection waits for it. Statements fail fast with a busy
//! error, liveness reports the session as live, close returns at once.

use async_trait::async_trait;
use futures::StreamExt;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, ConnectionLifecycle, RowStream,
    SESSION_BUSY,
};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server connection
pub struct SqlServerConnection {
    client: Arc<Mutex<TdsClient>>,
    query_timeout: Option<Duration>,
    last_used: Mutex<Instant>,
}

impl SqlServerConnection {
    /// Open a connection
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut tib_config = Config::new();
        tib_config.host(&config.host);
        tib_config.port(config.port);
        if !config.database.is_empty() {
            tib_config.database(&config.database);
        }
        if let Some(app) = &config.application_name {
            tib_config.application_name(app);
        }
        tib_config.authentication(AuthMethod::sql_server(
            config.username.as_deref().unwrap_or("sa"),
            config.password.as_deref().unwrap_or(""),
        ));
        if config.trust_cert {
            tib_config.trust_cert();
        }

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let client = tokio::time::timeout(connect_timeout, async {
            let tcp = TcpStream::connect(tib_config.get_addr())
                .await
                .map_err(|e| Error::connection_with_source("Failed to connect", e))?;
            tcp.set_nodelay(true).ok();

            Client::connect(tib_config, tcp.compat_write())
                .await
                .map_err(|e| Error::connection_with_source("Failed to authenticate", e))
        })
        .await
        .map_err(|_| {
            Error::connection(format!(
                "Connection to {}:{} timed out after {:?}",
                config.host, config.port, connect_timeout
            ))
        })??;

        debug!(host = %config.host, port = config.port, database = %config.database, "Connected to SQL Server");

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            query_timeout: config.query_timeout(),
            last_used: Mutex::new(Instant::now()),
        })
    }

    async fn update_last_used(&self) {
        *self.last_used.lock().await = Instant::now();
    }
}

#[async_trait]
impl ConnectionLifecycle for SqlServerConnection {
    async fn idle_time(&self) -> Duration {
        self.last_used.lock().await.elapsed()
    }

    async fn touch(&self) {
        self.update_last_used().await;
    }
}

/// Owned parameter wrapper for typed TDS binding
struct SqlParam(Value);

impl tiberius::ToSql for SqlParam {
    fn to_sql(&self) -> tiberius::ColumnData<'_> {
        use tiberius::ColumnData;

        match &self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Int16(n) => ColumnData::I16(Some(*n)),
            Value::Int32(n) => ColumnData::I32(Some(*n)),
            Value::Int64(n) => ColumnData::I64(Some(*n)),
            Value::Float32(n) => ColumnData::F32(Some(*n)),
            Value::Float64(n) => ColumnData::F64(Some(*n)),
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            Value::Uuid(u) => ColumnData::Guid(Some(*u)),
            // SQL Server converts ISO 8601 and decimal text implicitly
            Value::Decimal(_)
            | Value::Date(_)
            | Value::Time(_)
            | Value::DateTime(_)
            | Value::DateTimeTz(_)
            | Value::Json(_)
            | Value::Array(_) => ColumnData::String(self.0.as_string().map(Cow::Owned)),
        }
    }
}

fn param_refs(params: &[SqlParam]) -> Vec<&dyn tiberius::ToSql> {
    params.iter().map(|p| p as &dyn tiberius::ToSql).collect()
}

fn to_params(values: &[Value]) -> Vec<SqlParam> {
    values.iter().cloned().map(SqlParam).collect()
}

/// Read cell `idx` as `T`. `None` when the column holds another TDS type.
fn typed<'a, T>(row: &'a tiberius::Row, idx: usize, wrap: impl FnOnce(T) -> Value) -> Option<Value>
where
    T: tiberius::FromSql<'a>,
{
    row.try_get::<T, _>(idx)
        .ok()
        .map(|value| value.map_or(Value::Null, wrap))
}

/// Convert a column value, trying typed getters before raw bytes.
///
/// A typed NULL converts to `Value::Null`; a type no getter understands is a
/// conversion error rather than a silent NULL.
fn tiberius_to_value(row: &tiberius::Row, idx: usize) -> Result<Value> {
    let value = typed(row, idx, Value::Bool)
        .or_else(|| typed(row, idx, |v: u8| Value::Int16(i16::from(v))))
        .or_else(|| typed(row, idx, Value::Int16))
        .or_else(|| typed(row, idx, Value::Int32))
        .or_else(|| typed(row, idx, Value::Int64))
        .or_else(|| typed(row, idx, Value::Float32))
        .or_else(|| typed(row, idx, Value::Float64))
        .or_else(|| typed(row, idx, Value::Decimal))
        .or_else(|| typed(row, idx, |v: &str| Value::String(v.to_string())))
        .or_else(|| typed(row, idx, Value::Uuid))
        .or_else(|| typed(row, idx, Value::DateTimeTz))
        .or_else(|| typed(row, idx, Value::DateTime))
        .or_else(|| typed(row, idx, Value::Date))
        .or_else(|| typed(row, idx, Value::Time))
        .or_else(|| typed(row, idx, |v: &[u8]| Value::Bytes(v.to_vec())));
    if let Some(value) = value {
        return Ok(value);
    }

    match row.cells().nth(idx) {
        Some((column, data)) => untyped_cell(column.name(), data),
        None => Err(Error::type_conversion(format!(
            "column index {} out of range",
            idx
        ))),
    }
}

/// Convert a cell none of the typed getters accepted
fn untyped_cell(column: &str, data: &tiberius::ColumnData<'_>) -> Result<Value> {
    match data {
        tiberius::ColumnData::Xml(xml) => Ok(xml
            .as_ref()
            .map_or(Value::Null, |xml| Value::String((**xml).to_string()))),
        other => Err(Error::type_conversion(format!(
            "column '{}' holds a value with no conversion: {:?}",
            column, other
        ))),
    }
}

fn tiberius_row_to_row(tib_row: &tiberius::Row) -> Result<Row> {
    let columns: Vec<String> = tib_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = (0..columns.len())
        .map(|i| tiberius_to_value(tib_row, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

/// Take the session without waiting. Fails while a read stream owns it.
fn claim_session<T>(session: &Arc<Mutex<T>>) -> Result<OwnedMutexGuard<T>> {
    Arc::clone(session)
        .try_lock_owned()
        .map_err(|_| Error::execution(SESSION_BUSY))
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::execution(format!("Statement timed out after {:?}", limit)))?,
        None => fut.await,
    }
}

#[async_trait]
impl Connection for SqlServerConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut client = claim_session(&self.client)?;
        self.update_last_used().await;

        let tib_params = to_params(params);
        let refs = param_refs(&tib_params);
        let results = with_timeout(self.query_timeout, async {
            client
                .query(sql, &refs)
                .await
                .map_err(|e| Error::execution(format!("Query failed: {}", e)))?
                .into_results()
                .await
                .map_err(|e| Error::execution(format!("Failed to fetch rows: {}", e)))
        })
        .await?;

        results.iter().flatten().map(tiberius_row_to_row).collect()
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<RowStream> {
        let guard = claim_session(&self.client)?;
        self.update_last_used().await;

        let query_timeout = self.query_timeout;
        let sql = sql.to_string();
        let tib_params = to_params(params);

        let stream = async_stream::stream! {
            let mut guard = guard;
            let refs = param_refs(&tib_params);
            let pending = guard.query(sql.as_str(), &refs);
            let query = match query_timeout {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(result) => result.map_err(|e| Error::execution(format!("Query failed: {}", e))),
                    Err(_) => Err(Error::execution(format!("Statement timed out after {:?}", limit))),
                },
                None => pending
                    .await
                    .map_err(|e| Error::execution(format!("Query failed: {}", e))),
            };

            let query = match query {
                Ok(query) => query,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut rows = query.into_row_stream();
            while let Some(row) = rows.next().await {
                match row {
                    Ok(row) => {
                        let converted = tiberius_row_to_row(&row);
                        let failed = converted.is_err();
                        yield converted;
                        if failed {
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(Error::execution(format!("Failed to fetch row: {}", e)));
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn is_valid(&self) -> bool {
        match claim_session(&self.client) {
            Ok(mut client) => client.execute("SELECT 1", &[]).await.is_ok(),
            // A read stream owns the session
            Err(_) => true,
        }
    }

    async fn close(&self) -> Result<()> {
        // The socket closes with the last handle, the open stream included
        if claim_session(&self.client).is_err() {
            debug!("SQL Server connection released with a read stream still open");
        } else {
            debug!("SQL Server connection released");
        }
        Ok(())
    }
}

/// Opens `SqlServerConnection`s
#[derive(Debug, Clone, Default)]
pub struct SqlServerConnectionFactory;

#[async_trait]
impl ConnectionFactory for SqlServerConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let conn = SqlServerConnection::connect(config).await?;
        Ok(Arc::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiberius::ToSql;

    #[tokio::test]
    async fn test_session_claim_fails_fast_while_held() {
        let session = Arc::new(Mutex::new(()));
        let held = claim_session(&session).unwrap();

        let err = claim_session(&session).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
        assert!(err.to_string().contains(SESSION_BUSY));

        drop(held);
        assert!(claim_session(&session).is_ok());
    }

    #[test]
    fn test_xml_cells_are_read_as_text() {
        use tiberius::xml::XmlData;

        let xml = tiberius::ColumnData::Xml(Some(Cow::Owned(XmlData::new("<order id=\"1\"/>"))));
        assert_eq!(
            untyped_cell("doc", &xml).unwrap(),
            Value::String("<order id=\"1\"/>".into())
        );
        assert_eq!(
            untyped_cell("doc", &tiberius::ColumnData::Xml(None)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_unconvertible_cell_is_an_error() {
        let err = untyped_cell("payload", &tiberius::ColumnData::I32(Some(1))).unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn test_sql_param_null() {
        assert!(matches!(
            SqlParam(Value::Null).to_sql(),
            tiberius::ColumnData::String(None)
        ));
    }

    #[test]
    fn test_sql_param_scalars() {
        assert!(matches!(
            SqlParam(Value::Bool(true)).to_sql(),
            tiberius::ColumnData::Bit(Some(true))
        ));
        assert!(matches!(
            SqlParam(Value::Int64(7)).to_sql(),
            tiberius::ColumnData::I64(Some(7))
        ));
        assert!(matches!(
            SqlParam(Value::Float64(99.5)).to_sql(),
            tiberius::ColumnData::F64(Some(_))
        ));
    }

    #[test]
    fn test_sql_param_string_is_bound_verbatim() {
        let p = SqlParam(Value::String("x'; DROP TABLE users--".into()));
        if let tiberius::ColumnData::String(Some(cow)) = p.to_sql() {
            assert_eq!(&*cow, "x'; DROP TABLE users--");
        } else {
            panic!("Expected String ColumnData");
        }
    }

    #[test]
    fn test_sql_param_textual_conversions() {
        let d = chrono::NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        if let tiberius::ColumnData::String(Some(cow)) = SqlParam(Value::Date(d)).to_sql() {
            assert_eq!(&*cow, "2025-01-15");
        } else {
            panic!("Expected String ColumnData");
        }

        let dec = rust_decimal::Decimal::new(9950, 2);
        if let tiberius::ColumnData::String(Some(cow)) = SqlParam(Value::Decimal(dec)).to_sql() {
            assert_eq!(&*cow, "99.50");
        } else {
            panic!("Expected String ColumnData");
        }
    }

    #[test]
    fn test_sql_param_bytes_and_uuid() {
        assert!(matches!(
            SqlParam(Value::Bytes(vec![0xDE, 0xAD])).to_sql(),
            tiberius::ColumnData::Binary(Some(_))
        ));
        assert!(matches!(
            SqlParam(Value::Uuid(uuid::Uuid::new_v4())).to_sql(),
            tiberius::ColumnData::Guid(Some(_))
        ));
    }
}
