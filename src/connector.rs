//! The contract every backend implements, plus deadline handling

use crate::{
    backend::Backend, config::Credentials, error::Result, sanitize::Sanitizer, value::ResultSet,
    SqlError,
};
use async_trait::async_trait;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

/// Backend-specific implementation of open/close/query/execute.
///
/// `Handle` is the native connection. A handle only ever travels with the
/// connector that produced it (see [`crate::ConnectionHandle`]).
#[async_trait]
pub trait Connector: Send + Sync {
    type Handle: Send;

    fn backend(&self) -> Backend;

    /// `<dialect>://<host>:<port>/<database>`. User and password are passed
    /// to the driver separately and never appear here.
    fn connection_url(&self, credentials: &Credentials) -> String {
        format!(
            "{}://{}:{}/{}",
            self.backend().dialect(),
            credentials.host,
            credentials.port,
            credentials.database
        )
    }

    async fn open(&self, credentials: &Credentials) -> Result<Self::Handle>;

    /// Release the native connection.
    async fn close(&self, handle: Self::Handle) -> Result<()>;

    /// Run a read statement and materialize every row.
    async fn query(&self, handle: &mut Self::Handle, sql: &str) -> Result<ResultSet>;

    /// Run a mutating statement. The affected row count is discarded.
    async fn execute(&self, handle: &mut Self::Handle, sql: &str) -> Result<()>;
}

/// Sanitize `sql`, refusing input that ends up empty.
pub(crate) fn prepare(sanitizer: &dyn Sanitizer, sql: &str) -> Result<String> {
    let clean = sanitizer.sanitize(sql);
    if clean.trim().is_empty() {
        return Err(SqlError::Query("empty statement".to_string()));
    }
    Ok(clean)
}

/// Counts how many statements of a batch returned rows. A query must yield
/// exactly one result set.
#[derive(Debug, Default)]
pub(crate) struct ResultSets {
    count: usize,
    open: bool,
}

impl ResultSets {
    pub(crate) fn row(&mut self) {
        if !self.open {
            self.count += 1;
            self.open = true;
        }
    }

    pub(crate) fn statement_done(&mut self) {
        self.open = false;
    }

    pub(crate) fn single(&self) -> Result<()> {
        single_result_set(self.count)
    }
}

pub(crate) fn single_result_set(count: usize) -> Result<()> {
    if count > 1 {
        return Err(SqlError::Query(format!(
            "query produced multiple result sets ({}), expected one",
            count
        )));
    }
    Ok(())
}

/// Deadline and cancellation for a single operation.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Drive `fut` to completion under the deadline and cancellation token in
/// `options`. Cancellation wins over a result that is ready at the same time.
pub async fn bounded<T, F>(options: &CallOptions, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = async {
        match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(SqlError::Timeout(limit)),
            },
            None => fut.await,
        }
    };

    match &options.cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SqlError::Cancelled),
                result = timed => result,
            }
        }
        None => timed.await,
    }
}
