//! MySQL connector (sqlx native connection)

use crate::{
    backend::Backend,
    config::Credentials,
    connector::{prepare, Connector, ResultSets},
    error::Result,
    sanitize::Sanitizer,
    value::{Column, ResultSet, Row, Value},
    SqlError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow},
    Column as SqlxColumn, Connection, Either, Executor, Row as SqlxRow, TypeInfo,
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;

/// Connector for MySQL and MariaDB servers.
#[derive(Clone)]
pub struct MySqlConnector {
    sanitizer: Arc<dyn Sanitizer>,
}

impl MySqlConnector {
    pub fn new(sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self { sanitizer }
    }

    fn convert_row(row: &MySqlRow) -> Result<Row> {
        let mut values = Vec::with_capacity(row.len());
        for (i, column) in row.columns().iter().enumerate() {
            values.push(decode_cell(row, i, column.type_info().name())?);
        }
        Ok(Row::new(values))
    }
}

impl std::fmt::Debug for MySqlConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnector").finish_non_exhaustive()
    }
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value> {
    let decoded = match type_name {
        "NULL" => Ok(Value::Null),
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(index).map(Value::from)
        }
        // BIGINT UNSIGNED may not fit an i64, keep the digits in that case
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(index).map(|v| match v {
            Some(n) => i64::try_from(n)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(n.to_string())),
            None => Value::Null,
        }),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|n| Value::Float(n.into())).unwrap_or(Value::Null)),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index).map(Value::from),
        // TIME spans -838:59:59..838:59:59 and lax servers emit zero dates,
        // neither fits chrono
        "DATETIME" => or_text(
            row,
            index,
            row.try_get::<Option<NaiveDateTime>, _>(index).map(Value::from),
        ),
        "TIMESTAMP" => or_text(
            row,
            index,
            row.try_get::<Option<DateTime<Utc>>, _>(index)
                .map(|v| v.map(Value::TimestampTz).unwrap_or(Value::Null)),
        ),
        "DATE" => or_text(
            row,
            index,
            row.try_get::<Option<NaiveDate>, _>(index)
                .map(|v| v.map(Value::Date).unwrap_or(Value::Null)),
        ),
        "TIME" => or_text(
            row,
            index,
            row.try_get::<Option<NaiveTime>, _>(index)
                .map(|v| v.map(Value::Time).unwrap_or(Value::Null)),
        ),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Option<Vec<u8>>, _>(index).map(Value::from)
        }
        // DECIMAL, JSON, ENUM, SET, YEAR and the character types
        _ => row.try_get_unchecked::<Option<String>, _>(index).map(Value::from),
    };

    decoded.map_err(|e| SqlError::Query(format!("column {} ({}): {}", index, type_name, e)))
}

/// Fall back to the textual form when a typed decode fails.
fn or_text(
    row: &MySqlRow,
    index: usize,
    decoded: std::result::Result<Value, sqlx::Error>,
) -> std::result::Result<Value, sqlx::Error> {
    decoded.or_else(|_| row.try_get_unchecked::<Option<String>, _>(index).map(Value::from))
}

#[async_trait]
impl Connector for MySqlConnector {
    type Handle = MySqlConnection;

    fn backend(&self) -> Backend {
        Backend::MySql
    }

    async fn open(&self, credentials: &Credentials) -> Result<MySqlConnection> {
        let url = self.connection_url(credentials);
        let options = MySqlConnectOptions::from_str(&url)
            .map_err(|e| SqlError::Connection(format!("{}: {}", url, e)))?
            .username(&credentials.user)
            .password(&credentials.password);

        MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn close(&self, handle: MySqlConnection) -> Result<()> {
        handle
            .close()
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn query(&self, handle: &mut MySqlConnection, sql: &str) -> Result<ResultSet> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        // Text protocol: arbitrary statements, nothing prepared server side
        let mut rows: Vec<MySqlRow> = Vec::new();
        let mut sets = ResultSets::default();
        {
            let mut stream = (&mut *handle).fetch_many(sql.as_str());
            while let Some(item) = stream
                .try_next()
                .await
                .map_err(SqlError::from_sqlx_statement)?
            {
                match item {
                    Either::Left(_) => sets.statement_done(),
                    Either::Right(row) => {
                        sets.row();
                        rows.push(row);
                    }
                }
            }
        }
        sets.single()?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| Column::new(c.name(), c.type_info().name()))
                .collect(),
            // Rows carry the projection; without any, ask the server for it
            None => match (&mut *handle).describe(sql.as_str()).await {
                Ok(described) => described
                    .columns()
                    .iter()
                    .map(|c| Column::new(c.name(), c.type_info().name()))
                    .collect(),
                Err(e) => {
                    let err = SqlError::from_sqlx_statement(e);
                    if err.is_fatal_to_connection() {
                        return Err(err);
                    }
                    debug!("no column metadata for mysql statement: {}", err);
                    Vec::new()
                }
            },
        };

        let mut result = ResultSet::new(columns);
        for row in &rows {
            result.push(Self::convert_row(row)?)?;
        }

        debug!("mysql query returned {} rows", result.len());
        Ok(result)
    }

    async fn execute(&self, handle: &mut MySqlConnection, sql: &str) -> Result<()> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        let outcome = (&mut *handle)
            .execute(sql.as_str())
            .await
            .map_err(SqlError::from_sqlx_statement)?;

        debug!("mysql statement affected {} rows", outcome.rows_affected());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::TrimSanitizer;

    fn connector() -> MySqlConnector {
        MySqlConnector::new(Arc::new(TrimSanitizer))
    }

    #[test]
    fn test_connection_url_has_no_secrets() {
        let creds = Credentials::new("shop", "root", "secret", "db.local", "3306");
        let url = connector().connection_url(&creds);
        assert_eq!(url, "mysql://db.local:3306/shop");
        assert!(!url.contains("secret"));
        assert!(!url.contains("root"));
    }

    #[tokio::test]
    async fn test_open_malformed_port() {
        let creds = Credentials::new("shop", "root", "secret", "localhost", "abc");
        let err = connector().open(&creds).await.unwrap_err();
        assert!(matches!(err, SqlError::Connection(_)));
    }

    #[tokio::test]
    async fn test_open_refused() {
        let creds = Credentials::new("shop", "root", "secret", "127.0.0.1", "1");
        let err = connector().open(&creds).await.unwrap_err();
        assert!(matches!(err, SqlError::Connection(_)));
    }
}
