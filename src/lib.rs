//! Move tables between Oracle/PostgreSQL and in-memory rows.
//!
//! Each adapter call opens one connection, does its work and closes the
//! connection before returning. Failures come back as [`DbError`].

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod table;

pub use config::{get_config_param, ConnParams};
pub use db::{Database, DbKind, UploadReport};
pub use error::{ConfigError, DbError};
pub use table::{Table, Value};
