//! # MultiSQL - One Client Facade for Several SQL Backends
//!
//! MultiSQL lets a caller pick a backend by mode and then connect, query,
//! insert, update and delete without touching driver specifics.
//!
//! ## Backends
//!
//! - **MySQL**: mode `0`, via sqlx (feature `mysql`)
//! - **PostgreSQL**: mode `1`, via sqlx (feature `postgres`)
//! - **SQL Server**: mode `2`, via tiberius (feature `sqlserver`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use multisql::{Backend, Credentials, MultiConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut db = MultiConnection::new(Backend::PostgreSql);
//!     db.connect(Credentials::new("testdb", "admin", "x", "localhost", "5432")).await?;
//!
//!     for row in &db.execute_query("SELECT id, name FROM users").await? {
//!         println!("{:?}", row.values());
//!     }
//!
//!     db.execute_insert("INSERT INTO users(id,name) VALUES (3,'Carol')").await?;
//!     db.disconnect().await?;
//!     Ok(())
//! }
//! ```

#[cfg(not(any(feature = "mysql", feature = "postgres", feature = "sqlserver")))]
compile_error!("enable at least one of the `mysql`, `postgres` or `sqlserver` features");

pub mod backend;
pub mod config;
pub mod connector;
pub mod error;
pub mod facade;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sanitize;
#[cfg(feature = "sqlserver")]
pub mod sqlserver;
pub mod value;

pub use backend::{Backend, ConnectionHandle};
pub use config::{Credentials, MultiConfig};
pub use connector::{CallOptions, Connector};
pub use error::{Result, SqlError};
pub use facade::{ConnectionState, MultiConnection, StatementKind};
pub use sanitize::{Sanitizer, TrimSanitizer};
pub use value::{Column, ResultSet, Row, Value};

pub use tokio_util::sync::CancellationToken;
