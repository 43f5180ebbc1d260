//! PostgreSQL connector (sqlx native connection)

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
    postgres::{PgConnectOptions, PgConnection, PgRow},
    Column as SqlxColumn, Connection, Either, Executor, Row as SqlxRow, TypeInfo,
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;

/// Connector for PostgreSQL servers.
#[derive(Clone)]
pub struct PostgresConnector {
    sanitizer: Arc<dyn Sanitizer>,
}

impl PostgresConnector {
    pub fn new(sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self { sanitizer }
    }

    fn convert_row(row: &PgRow) -> Result<Row> {
        let mut values = Vec::with_capacity(row.len());
        for (i, column) in row.columns().iter().enumerate() {
            values.push(decode_cell(row, i, column.type_info().name())?);
        }
        Ok(Row::new(values))
    }
}

impl std::fmt::Debug for PostgresConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnector").finish_non_exhaustive()
    }
}

/// Decode one cell according to the column's Postgres type. Types without a
/// matching [`Value`] variant (NUMERIC, JSON, UUID, ...) come back as text.
fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Value> {
    let decoded = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(Value::from),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(|n| Value::Int(n.into())).unwrap_or(Value::Null)),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|n| Value::Float(n.into())).unwrap_or(Value::Null)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(Value::from),
        // 'infinity' and BC dates do not fit chrono
        "TIMESTAMP" => or_text(
            row,
            index,
            row.try_get::<Option<NaiveDateTime>, _>(index).map(Value::from),
        ),
        "TIMESTAMPTZ" => or_text(
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
        // '24:00:00' is a valid TIME
        "TIME" => or_text(
            row,
            index,
            row.try_get::<Option<NaiveTime>, _>(index)
                .map(|v| v.map(Value::Time).unwrap_or(Value::Null)),
        ),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index).map(Value::from),
        _ => row.try_get_unchecked::<Option<String>, _>(index).map(Value::from),
    };

    decoded.map_err(|e| SqlError::Query(format!("column {} ({}): {}", index, type_name, e)))
}

fn or_text(
    row: &PgRow,
    index: usize,
    decoded: std::result::Result<Value, sqlx::Error>,
) -> std::result::Result<Value, sqlx::Error> {
    decoded.or_else(|_| row.try_get_unchecked::<Option<String>, _>(index).map(Value::from))
}

#[async_trait]
impl Connector for PostgresConnector {
    type Handle = PgConnection;

    fn backend(&self) -> Backend {
        Backend::PostgreSql
    }

    async fn open(&self, credentials: &Credentials) -> Result<PgConnection> {
        let url = self.connection_url(credentials);
        let options = PgConnectOptions::from_str(&url)
            .map_err(|e| SqlError::Connection(format!("{}: {}", url, e)))?
            .username(&credentials.user)
            .password(&credentials.password);

        PgConnection::connect_with(&options)
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn close(&self, handle: PgConnection) -> Result<()> {
        handle
            .close()
            .await
            .map_err(|e| SqlError::Connection(e.to_string()))
    }

    async fn query(&self, handle: &mut PgConnection, sql: &str) -> Result<ResultSet> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        // A plain &str runs through the simple query protocol, no statement
        // is prepared on the server.
        let mut rows: Vec<PgRow> = Vec::new();
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
                    debug!("no column metadata for postgres statement: {}", err);
                    Vec::new()
                }
            },
        };

        let mut result = ResultSet::new(columns);
        for row in &rows {
            result.push(Self::convert_row(row)?)?;
        }

        debug!("postgres query returned {} rows", result.len());
        Ok(result)
    }

    async fn execute(&self, handle: &mut PgConnection, sql: &str) -> Result<()> {
        let sql = prepare(self.sanitizer.as_ref(), sql)?;

        let outcome = (&mut *handle)
            .execute(sql.as_str())
            .await
            .map_err(SqlError::from_sqlx_statement)?;

        debug!("postgres statement affected {} rows", outcome.rows_affected());
        Ok(())
    }
}
