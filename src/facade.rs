//! The single entry point callers use to talk to any supported backend

use crate::{
    backend::{Backend, ConnectionHandle},
    config::{Credentials, MultiConfig},
    connector::{bounded, CallOptions},
    error::Result,
    sanitize::{Sanitizer, TrimSanitizer},
    value::ResultSet,
    SqlError,
};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Observable connection state of a [`MultiConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    /// Connected, to the backend the handle was opened against.
    Connected(Backend),
}

/// Kind of mutating statement, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        })
    }
}

/// Unified client over MySQL, PostgreSQL and SQL Server.
///
/// Holds the selected backend mode, the last credentials and at most one
/// open [`ConnectionHandle`]. Every operation after `connect` is dispatched
/// through the handle, which carries its own connector, so changing the mode
/// while connected only affects the next `connect`.
///
/// All operations take `&mut self`: one facade drives one connection at a
/// time. Share it behind a `tokio::sync::Mutex` if several tasks need it.
///
/// # Example
///
/// ```rust,ignore
/// use multisql::{Backend, Credentials, MultiConnection};
///
/// let mut db = MultiConnection::new(Backend::PostgreSql);
/// db.connect(Credentials::new("testdb", "admin", "x", "localhost", "5432")).await?;
/// let users = db.execute_query("SELECT id, name FROM users").await?;
/// db.execute_insert("INSERT INTO users(id,name) VALUES (3,'Carol')").await?;
/// db.disconnect().await?;
/// ```
pub struct MultiConnection {
    mode: Backend,
    credentials: Option<Credentials>,
    handle: Option<ConnectionHandle>,
    sanitizer: Arc<dyn Sanitizer>,
    options: CallOptions,
}

impl MultiConnection {
    pub fn new(mode: Backend) -> Self {
        Self {
            mode,
            credentials: None,
            handle: None,
            sanitizer: Arc::new(TrimSanitizer),
            options: CallOptions::default(),
        }
    }

    /// Build from a numeric mode code (`0` MySQL, `1` PostgreSQL,
    /// `2` SQL Server).
    pub fn from_mode_code(code: i32) -> Result<Self> {
        Ok(Self::new(Backend::from_code(code)?))
    }

    pub fn from_config(config: &MultiConfig) -> Result<Self> {
        let mut facade = Self::new(config.backend()?);
        facade.credentials = config.credentials.clone();
        facade.options.timeout = config.timeout();
        Ok(facade)
    }

    /// Replace the sanitizer applied to every statement.
    pub fn with_sanitizer(mut self, sanitizer: impl Sanitizer + 'static) -> Self {
        self.sanitizer = Arc::new(sanitizer);
        self
    }

    /// Default deadline and cancellation for operations that do not pass
    /// their own [`CallOptions`].
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mode(&self) -> Backend {
        self.mode
    }

    /// Select the backend for the next `connect`. Never touches an open
    /// connection.
    pub fn set_mode(&mut self, mode: Backend) {
        if let Some(handle) = &self.handle
            && handle.backend() != mode
        {
            debug!(
                "mode set to {} while connected to {}; applies to the next connect",
                mode,
                handle.backend()
            );
        }
        self.mode = mode;
    }

    pub fn set_mode_code(&mut self, code: i32) -> Result<()> {
        self.set_mode(Backend::from_code(code)?);
        Ok(())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn state(&self) -> ConnectionState {
        match &self.handle {
            Some(handle) => ConnectionState::Connected(handle.backend()),
            None => ConnectionState::Unconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    /// Open a connection to the current mode's backend.
    ///
    /// A handle that is already held is closed first. On failure the facade
    /// stays unconnected.
    pub async fn connect(&mut self, credentials: Credentials) -> Result<&ConnectionHandle> {
        let options = self.options.clone();
        self.connect_with(credentials, &options).await
    }

    pub async fn connect_with(
        &mut self,
        credentials: Credentials,
        options: &CallOptions,
    ) -> Result<&ConnectionHandle> {
        if self.handle.is_some() {
            warn!("connect called while connected, closing the previous connection");
            self.disconnect().await?;
        }

        let mode = self.mode;
        let sanitizer = Arc::clone(&self.sanitizer);
        let handle = bounded(
            options,
            ConnectionHandle::open(mode, &credentials, sanitizer),
        )
        .await?;

        info!("Connected to {}", handle.url());
        self.credentials = Some(credentials);
        Ok(self.handle.insert(handle))
    }

    /// Connect again with the stored credentials.
    pub async fn reconnect(&mut self) -> Result<&ConnectionHandle> {
        let credentials = self.credentials.clone().ok_or_else(|| {
            SqlError::Connection("no credentials have been set".to_string())
        })?;
        self.connect(credentials).await
    }

    /// Close the held connection, if any.
    ///
    /// Calling this without a connection is a no-op. The handle is released
    /// even when closing it fails; the failure is still returned.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let url = handle.url().to_string();
        handle.close().await?;
        info!("Disconnected from {}", url);
        Ok(())
    }

    /// Run a read query and return every row.
    pub async fn execute_query(&mut self, sql: &str) -> Result<ResultSet> {
        let options = self.options.clone();
        self.execute_query_with(sql, &options).await
    }

    pub async fn execute_query_with(
        &mut self,
        sql: &str,
        options: &CallOptions,
    ) -> Result<ResultSet> {
        let handle = self.handle.as_mut().ok_or(SqlError::NoConnection)?;
        let outcome = bounded(options, handle.query(sql)).await;
        self.settle(outcome)
    }

    pub async fn execute_insert(&mut self, sql: &str) -> Result<()> {
        self.execute_statement(StatementKind::Insert, sql).await
    }

    pub async fn execute_update(&mut self, sql: &str) -> Result<()> {
        self.execute_statement(StatementKind::Update, sql).await
    }

    pub async fn execute_delete(&mut self, sql: &str) -> Result<()> {
        self.execute_statement(StatementKind::Delete, sql).await
    }

    async fn execute_statement(&mut self, kind: StatementKind, sql: &str) -> Result<()> {
        let options = self.options.clone();
        self.execute_statement_with(kind, sql, &options).await
    }

    /// Run a mutating statement under explicit options. No rows are returned.
    pub async fn execute_statement_with(
        &mut self,
        kind: StatementKind,
        sql: &str,
        options: &CallOptions,
    ) -> Result<()> {
        let handle = self.handle.as_mut().ok_or(SqlError::NoConnection)?;
        debug!("running {} on {}", kind, handle.backend());
        let outcome = bounded(options, handle.execute(sql)).await;
        self.settle(outcome)
    }

    /// A lost link, a terminated session, a timeout or a cancellation leave
    /// the native connection unusable; it is dropped rather than reused.
    fn settle<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome
            && err.is_fatal_to_connection()
            && let Some(handle) = self.handle.take()
        {
            warn!("discarding connection to {} after: {}", handle.url(), err);
        }
        outcome
    }
}

impl fmt::Debug for MultiConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiConnection")
            .field("mode", &self.mode)
            .field("credentials", &self.credentials)
            .field("handle", &self.handle)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn unreachable_credentials() -> Credentials {
        Credentials::new("testdb", "admin", "x", "127.0.0.1", "1")
    }

    #[tokio::test]
    async fn test_operations_without_connection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut db = MultiConnection::new(Backend::PostgreSql).with_sanitizer(move |sql: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            sql.to_string()
        });

        assert!(matches!(
            db.execute_query("SELECT 1").await,
            Err(SqlError::NoConnection)
        ));
        assert!(matches!(
            db.execute_insert("INSERT INTO t VALUES (1)").await,
            Err(SqlError::NoConnection)
        ));
        assert!(matches!(
            db.execute_update("UPDATE t SET a = 1").await,
            Err(SqlError::NoConnection)
        ));
        assert!(matches!(
            db.execute_delete("DELETE FROM t").await,
            Err(SqlError::NoConnection)
        ));
        // Nothing reached a connector
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let mut db = MultiConnection::new(Backend::MySql);
        db.disconnect().await.unwrap();
        db.disconnect().await.unwrap();
        assert_eq!(db.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_unknown_mode_code() {
        assert!(matches!(
            MultiConnection::from_mode_code(5),
            Err(SqlError::UnsupportedMode(5))
        ));

        let mut db = MultiConnection::from_mode_code(1).unwrap();
        assert_eq!(db.mode(), Backend::PostgreSql);
        assert!(matches!(db.set_mode_code(42), Err(SqlError::UnsupportedMode(42))));
        // A rejected code leaves the mode untouched
        assert_eq!(db.mode(), Backend::PostgreSql);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_unconnected() {
        for backend in Backend::ALL {
            let mut db = MultiConnection::new(backend);
            let err = db.connect(unreachable_credentials()).await.unwrap_err();
            assert!(matches!(err, SqlError::Connection(_)), "{}: {:?}", backend, err);
            assert_eq!(db.state(), ConnectionState::Unconnected);
            assert!(db.credentials().is_none());
        }
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let token = CancellationToken::new();
        token.cancel();
        let mut db = MultiConnection::new(Backend::SqlServer);
        let err = db
            .connect_with(unreachable_credentials(), &CallOptions::new().cancel_on(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::Cancelled));
        assert!(!db.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_requires_credentials() {
        let mut db = MultiConnection::new(Backend::MySql);
        assert!(matches!(db.reconnect().await, Err(SqlError::Connection(_))));

        db.set_credentials(unreachable_credentials());
        assert!(matches!(db.reconnect().await, Err(SqlError::Connection(_))));
    }

    #[test]
    fn test_from_config() {
        let config = MultiConfig::new(Backend::SqlServer)
            .with_credentials(unreachable_credentials())
            .with_timeout(Duration::from_secs(3));
        let db = MultiConnection::from_config(&config).unwrap();
        assert_eq!(db.mode(), Backend::SqlServer);
        assert_eq!(db.credentials().unwrap().host, "127.0.0.1");
        assert_eq!(db.options.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_set_mode_is_pure() {
        let mut db = MultiConnection::new(Backend::MySql);
        db.set_mode(Backend::SqlServer);
        assert_eq!(db.mode(), Backend::SqlServer);
        assert_eq!(db.state(), ConnectionState::Unconnected);
    }
}
