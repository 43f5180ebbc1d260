//! Microsoft SQL Server connector (tiberius over a tokio TCP stream)

use crate::{
    backend::Backend,
    config::Credentials,
    connector::{prepare, single_result_set, Connector},
    error::Result,
    sanitize::Sanitizer,
    value::{Column, ResultSet, Row, Value},
    SqlError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::sync::Arc;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// Native SQL Server connection.
pub type SqlServerClient = Client<Compat<TcpStream>>;

/// Connector for SQL Server over TDS 7.3+.
#[derive(Clone)]
pub struct SqlServerConnector {
    sanitizer: Arc<dyn Sanitizer>,
}

impl SqlServerConnector {
    pub fn new(sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self { sanitizer }
    }

    fn client_config(credentials: &Credentials) -> Result<Config> {
        let port: u16 = credentials.port.trim().parse().map_err(|_| {
            SqlError::Connection(format!("invalid port \"{}\"", credentials.port))
        })?;

        let mut config = Config::new();
        config.host(&credentials.host);
        config.port(port);
        if !credentials.database.is_empty() {
            config.database(&credentials.database);
        }
        config.authentication(AuthMethod::sql_server(
            &credentials.user,
            &credentials.password,
        ));
        // Servers commonly run with self-signed certificates
        config.trust_cert();
        Ok(config)
    }
}

impl std::fmt::Debug for SqlServerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerConnector").finish_non_exhaustive()
    }
}

/// Server-reported errors are query errors, transport failures are not.
fn statement_error(err: tiberius::error::Error) -> SqlError {
    match err {
        tiberius::error::Error::Io { .. } => SqlError::Connection(err.to_string()),
        e => SqlError::Query(e.to_string()),
    }
}

fn decode_error(err: tiberius::error::Error) -> SqlError {
    SqlError::Query(format!("cannot decode column: {}", err))
}

/// Render a scaled integer as a decimal string: `(1250, 2)` is `"12.50"`.
fn numeric_text(value: i128, scale: u8) -> String {
    if scale == 0 {
        return value.to_string();
    }
    let scale = usize::from(scale);
    let digits = format!("{:0>width$}", value.unsigned_abs(), width = scale + 1);
    let (whole, fraction) = digits.split_at(digits.len() - scale);
    let sign = if value < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, whole, fraction)
}

fn convert_cell(data: ColumnData<'static>) -> Result<Value> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|n| Value::Int(n.into())),
        ColumnData::I16(v) => v.map(|n| Value::Int(n.into())),
        ColumnData::I32(v) => v.map(|n| Value::Int(n.into())),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|n| Value::Float(n.into())),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| Value::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| Value::Text(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::Bytes(b.to_vec())),
        // Exact digits, like DECIMAL on the other backends
        ColumnData::Numeric(v) => v
            .as_ref()
            .map(|n| Value::Text(numeric_text(n.value(), n.scale()))),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| Value::Text(x.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)
                .map_err(decode_error)?
                .map(Value::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(&data)
            .map_err(decode_error)?
            .map(Value::TimestampTz),
        ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .map_err(decode_error)?
            .map(Value::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .map_err(decode_error)?
            .map(Value::Time),
    };

    Ok(value.unwrap_or(Value::Null))
}

#[async_trait]
impl Connector for SqlServerConnector {
    type Handle = SqlServerClient;

    fn backend(&self) -> Backend {
        Backend::SqlServer
    }

    async fn open(&self, credentials: &Credentials) -> Result<SqlServerClient> {
        let config = Self::client_config(credentials)?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SqlError::Connection(format!("{}: {}", config.get_addr(), e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| SqlError::Connection(e.to_string()))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn close(&self, handle: SqlServerClient) -> Result<()> {
        handle
            .close()
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn query(&self, handle: &mut SqlServerClient, sql: &str) -> Result<ResultSet> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        let mut stream = handle
            .simple_query(sql.as_str())
            .await
            .map_err(statement_error)?;

        // SQL Server describes the projection even when no row follows
        let columns: Vec<Column> = stream
            .columns()
            .await
            .map_err(statement_error)?
            .map(|cols| {
                cols.iter()
                    .map(|c| Column::new(c.name(), format!("{:?}", c.column_type())))
                    .collect()
            })
            .unwrap_or_default();

        let mut results = stream.into_results().await.map_err(statement_error)?;
        single_result_set(results.len())?;
        let rows = results.pop().unwrap_or_default();

        let mut result = ResultSet::new(columns);
        for row in rows {
            let values = row
                .into_iter()
                .map(convert_cell)
                .collect::<Result<Vec<_>>>()?;
            result.push(Row::new(values))?;
        }

        debug!("sqlserver query returned {} rows", result.len());
        Ok(result)
    }

    async fn execute(&self, handle: &mut SqlServerClient, sql: &str) -> Result<()> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        let outcome = handle
            .execute(sql.as_str(), &[])
            .await
            .map_err(statement_error)?;

        debug!("sqlserver statement affected {} rows", outcome.total());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tiberius::numeric::Numeric;

    fn connector() -> SqlServerConnector {
        SqlServerConnector::new(Arc::new(crate::sanitize::TrimSanitizer))
    }

    #[test]
    fn test_connection_url() {
        let creds = Credentials::new("master", "sa", "pw", "mssql.local", "1433");
        assert_eq!(
            connector().connection_url(&creds),
            "sqlserver://mssql.local:1433/master"
        );
    }

    #[test]
    fn test_invalid_port_is_connection_error() {
        let creds = Credentials::new("master", "sa", "pw", "localhost", "14x3");
        assert!(matches!(
            SqlServerConnector::client_config(&creds),
            Err(SqlError::Connection(_))
        ));
    }

    #[test]
    fn test_convert_cells_keep_native_types() {
        assert_eq!(convert_cell(ColumnData::I32(Some(7))).unwrap(), Value::Int(7));
        assert_eq!(convert_cell(ColumnData::Bit(Some(true))).unwrap(), Value::Bool(true));
        assert_eq!(convert_cell(ColumnData::I64(None)).unwrap(), Value::Null);
        assert_eq!(
            convert_cell(ColumnData::String(Some(Cow::Borrowed("Alice")))).unwrap(),
            Value::Text("Alice".into())
        );
        assert_eq!(convert_cell(ColumnData::F64(Some(1.5))).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_numeric_text_keeps_scale() {
        assert_eq!(numeric_text(1250, 2), "12.50");
        assert_eq!(numeric_text(-5, 3), "-0.005");
        assert_eq!(numeric_text(42, 0), "42");
        assert_eq!(numeric_text(-1234, 1), "-123.4");
        assert_eq!(
            numeric_text(12345678901234567890123456789, 2),
            "123456789012345678901234567.89"
        );
    }

    #[test]
    fn test_convert_numeric_is_exact_text() {
        let cell = ColumnData::Numeric(Some(Numeric::new_with_scale(1250, 2)));
        assert_eq!(convert_cell(cell).unwrap(), Value::Text("12.50".into()));
        assert_eq!(convert_cell(ColumnData::Numeric(None)).unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_open_refused() {
        let creds = Credentials::new("master", "sa", "pw", "127.0.0.1", "1");
        let err = connector().open(&creds).await.unwrap_err();
        assert!(matches!(err, SqlError::Connection(_)));
    }
}
