//! Error types shared by the adapters and the config loader.
//!
//! - `ConfigError`: the INI file or the requested section could not be used
//! - `DbError`: everything an adapter call can fail with

use thiserror::Error;

/// Failures while loading connection parameters from an INI file
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Section {section} not found in the {path} file")]
    SectionNotFound { section: String, path: String },

    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid connection parameter '{0}', expected key=value")]
    InvalidPair(String),
}

/// Failures of an adapter call, classified so callers can decide what to do
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Statement failed: {0}")]
    Statement(String),

    #[error("Number of upload columns does not match: table {table} has {expected} columns, data has {found}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Cannot convert value for column {column}: {message}")]
    Value { column: String, message: String },

    #[error("Row has {found} values, table has {expected} columns")]
    RowArity { expected: usize, found: usize },
}

impl DbError {
    pub fn is_connection(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
