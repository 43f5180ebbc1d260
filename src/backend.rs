//! Backend selection and the handle that binds a connector to its connection
//!
//! A [`ConnectionHandle`] pairs the connector that opened a native connection
//! with that connection, so every later operation is routed to the same
//! implementation no matter what mode the facade holds by then.

use crate::{
    config::Credentials,
    connector::Connector,
    error::Result,
    sanitize::Sanitizer,
    value::ResultSet,
    SqlError,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

#[cfg(feature = "mysql")]
use crate::mysql::MySqlConnector;
#[cfg(feature = "postgres")]
use crate::postgres::PostgresConnector;
#[cfg(feature = "sqlserver")]
use crate::sqlserver::{SqlServerClient, SqlServerConnector};

/// Supported database backends.
///
/// Numeric mode codes: `0` MySQL, `1` PostgreSQL, `2` SQL Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql,
    #[serde(rename = "postgresql", alias = "postgres", alias = "pgsql")]
    PostgreSql,
    #[serde(rename = "sqlserver", alias = "mssql")]
    SqlServer,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::MySql, Backend::PostgreSql, Backend::SqlServer];

    /// Resolve a numeric mode code. Unknown codes are an error, never a
    /// default.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Backend::MySql),
            1 => Ok(Backend::PostgreSql),
            2 => Ok(Backend::SqlServer),
            other => Err(SqlError::UnsupportedMode(other)),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Backend::MySql => 0,
            Backend::PostgreSql => 1,
            Backend::SqlServer => 2,
        }
    }

    /// Scheme used in connection URLs.
    pub fn dialect(self) -> &'static str {
        match self {
            Backend::MySql => "mysql",
            Backend::PostgreSql => "postgres",
            Backend::SqlServer => "sqlserver",
        }
    }

    /// Whether the driver for this backend was compiled in.
    pub fn is_available(self) -> bool {
        match self {
            Backend::MySql => cfg!(feature = "mysql"),
            Backend::PostgreSql => cfg!(feature = "postgres"),
            Backend::SqlServer => cfg!(feature = "sqlserver"),
        }
    }
}

impl TryFrom<i32> for Backend {
    type Error = SqlError;

    fn try_from(code: i32) -> Result<Self> {
        Backend::from_code(code)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::MySql => "mysql",
            Backend::PostgreSql => "postgresql",
            Backend::SqlServer => "sqlserver",
        };
        f.write_str(name)
    }
}

impl FromStr for Backend {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Backend::MySql),
            "postgresql" | "postgres" | "pgsql" => Ok(Backend::PostgreSql),
            "sqlserver" | "mssql" => Ok(Backend::SqlServer),
            other => Err(SqlError::Config(format!("unknown backend \"{}\"", other))),
        }
    }
}

/// Connector and native connection, always kept together.
enum Session {
    #[cfg(feature = "mysql")]
    MySql(MySqlConnector, sqlx::mysql::MySqlConnection),
    #[cfg(feature = "postgres")]
    Postgres(PostgresConnector, sqlx::postgres::PgConnection),
    #[cfg(feature = "sqlserver")]
    SqlServer(SqlServerConnector, SqlServerClient),
}

/// An open connection to one backend. Owned exclusively by whoever opened it.
pub struct ConnectionHandle {
    backend: Backend,
    url: String,
    session: Session,
}

impl ConnectionHandle {
    /// Open a connection through the connector for `backend`.
    pub(crate) async fn open(
        backend: Backend,
        credentials: &Credentials,
        sanitizer: Arc<dyn Sanitizer>,
    ) -> Result<Self> {
        match backend {
            #[cfg(feature = "mysql")]
            Backend::MySql => {
                let connector = MySqlConnector::new(sanitizer);
                let url = connector.connection_url(credentials);
                let conn = connector.open(credentials).await?;
                Ok(Self::new(backend, url, Session::MySql(connector, conn)))
            }
            #[cfg(feature = "postgres")]
            Backend::PostgreSql => {
                let connector = PostgresConnector::new(sanitizer);
                let url = connector.connection_url(credentials);
                let conn = connector.open(credentials).await?;
                Ok(Self::new(backend, url, Session::Postgres(connector, conn)))
            }
            #[cfg(feature = "sqlserver")]
            Backend::SqlServer => {
                let connector = SqlServerConnector::new(sanitizer);
                let url = connector.connection_url(credentials);
                let conn = connector.open(credentials).await?;
                Ok(Self::new(backend, url, Session::SqlServer(connector, conn)))
            }
            #[allow(unreachable_patterns)]
            unavailable => {
                let _ = (credentials, sanitizer);
                Err(SqlError::Connection(format!(
                    "driver for {} is not available in this build",
                    unavailable
                )))
            }
        }
    }

    fn new(backend: Backend, url: String, session: Session) -> Self {
        Self {
            backend,
            url,
            session,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Connection URL without user or password.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        match &mut self.session {
            #[cfg(feature = "mysql")]
            Session::MySql(connector, conn) => connector.query(conn, sql).await,
            #[cfg(feature = "postgres")]
            Session::Postgres(connector, conn) => connector.query(conn, sql).await,
            #[cfg(feature = "sqlserver")]
            Session::SqlServer(connector, conn) => connector.query(conn, sql).await,
        }
    }

    pub(crate) async fn execute(&mut self, sql: &str) -> Result<()> {
        match &mut self.session {
            #[cfg(feature = "mysql")]
            Session::MySql(connector, conn) => connector.execute(conn, sql).await,
            #[cfg(feature = "postgres")]
            Session::Postgres(connector, conn) => connector.execute(conn, sql).await,
            #[cfg(feature = "sqlserver")]
            Session::SqlServer(connector, conn) => connector.execute(conn, sql).await,
        }
    }

    pub(crate) async fn close(self) -> Result<()> {
        match self.session {
            #[cfg(feature = "mysql")]
            Session::MySql(connector, conn) => connector.close(conn).await,
            #[cfg(feature = "postgres")]
            Session::Postgres(connector, conn) => connector.close(conn).await,
            #[cfg(feature = "sqlserver")]
            Session::SqlServer(connector, conn) => connector.close(conn).await,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes() {
        for backend in Backend::ALL {
            assert_eq!(Backend::from_code(backend.code()).unwrap(), backend);
        }
        assert!(matches!(Backend::from_code(3), Err(SqlError::UnsupportedMode(3))));
        assert!(matches!(Backend::try_from(-1), Err(SqlError::UnsupportedMode(-1))));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Postgres".parse::<Backend>().unwrap(), Backend::PostgreSql);
        assert_eq!("mssql".parse::<Backend>().unwrap(), Backend::SqlServer);
        assert_eq!("mysql".parse::<Backend>().unwrap(), Backend::MySql);
        assert!("oracle".parse::<Backend>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for backend in Backend::ALL {
            assert_eq!(backend.to_string().parse::<Backend>().unwrap(), backend);
        }
    }

    #[tokio::test]
    async fn test_open_unreachable_is_connection_error() {
        let creds = Credentials::new("db", "u", "p", "127.0.0.1", "1");
        for backend in Backend::ALL {
            let err = ConnectionHandle::open(
                backend,
                &creds,
                Arc::new(crate::sanitize::TrimSanitizer),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, SqlError::Connection(_)), "{}: {:?}", backend, err);
        }
    }
}
