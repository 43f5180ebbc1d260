//! Credentials and file-based configuration

use crate::{backend::Backend, error::Result, SqlError};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, time::Duration};

/// Connection credentials. Opaque strings, not validated here.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
}

impl Credentials {
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port: port.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Facade configuration, usually loaded from a TOML file.
///
/// The backend is chosen either by name (`backend = "postgresql"`) or by
/// numeric mode code (`mode = 1`).
#[derive(Debug, Clone, Deserialize)]
pub struct MultiConfig {
    #[serde(default)]
    backend: Option<Backend>,
    #[serde(default)]
    mode: Option<i32>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Default deadline for every operation, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl MultiConfig {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend: Some(backend),
            mode: None,
            credentials: None,
            timeout_secs: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: MultiConfig =
            toml::from_str(raw).map_err(|e| SqlError::Config(e.to_string()))?;
        config.backend()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// The selected backend. `backend` and `mode` must agree when both are set.
    pub fn backend(&self) -> Result<Backend> {
        match (self.backend, self.mode) {
            (Some(backend), None) => Ok(backend),
            (None, Some(code)) => Backend::from_code(code),
            (Some(backend), Some(code)) => {
                if Backend::from_code(code)? == backend {
                    Ok(backend)
                } else {
                    Err(SqlError::Config(format!(
                        "backend \"{}\" conflicts with mode {}",
                        backend, code
                    )))
                }
            }
            (None, None) => Err(SqlError::Config(
                "either `backend` or `mode` must be set".to_string(),
            )),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
