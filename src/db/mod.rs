pub mod ident;
pub mod oracle;
pub mod postgres;

use crate::config::{get_config_param, ConnParams};
use crate::error::Result;
use crate::table::Table;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One vendor's facade: every call opens its own connection and closes it
/// before returning.
pub trait Database {
    /// Run a query and return all rows with the descriptor's column names
    fn get_data(&self, sql: &str) -> Result<Table>;

    /// Insert every row of `data` into `table` and commit once
    fn upload_data(&self, table: &str, data: &Table) -> Result<UploadReport>;

    /// Run and commit a statement whose result is not needed
    fn execute(&self, sql: &str) -> Result<()>;

    fn kind(&self) -> DbKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadReport {
    pub rows_inserted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Oracle,
    Postgres,
}

impl FromStr for DbKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "oracle" => Ok(DbKind::Oracle),
            "postgres" | "postgresql" | "pg" => Ok(DbKind::Postgres),
            other => Err(format!("unsupported database type: {}", other)),
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbKind::Oracle => f.write_str("oracle"),
            DbKind::Postgres => f.write_str("postgres"),
        }
    }
}

pub fn open(kind: DbKind, params: ConnParams) -> Box<dyn Database> {
    match kind {
        DbKind::Oracle => Box::new(oracle::OracleDatabase::new(params)),
        DbKind::Postgres => Box::new(postgres::PostgresDatabase::new(params)),
    }
}

/// Connection parameters from an optional INI section, with `key=value`
/// overrides applied on top
pub fn connection_params<S: AsRef<str>>(
    config: Option<(&Path, &str)>,
    overrides: &[S],
) -> Result<ConnParams> {
    let mut params = match config {
        Some((path, section)) => get_config_param(path, section)?,
        None => ConnParams::new(),
    };
    for (k, v) in ConnParams::from_pairs(overrides)?.iter() {
        params.insert(k, v);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, DbError};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("Oracle".parse::<DbKind>().unwrap(), DbKind::Oracle);
        assert_eq!("postgresql".parse::<DbKind>().unwrap(), DbKind::Postgres);
        assert_eq!("pg".parse::<DbKind>().unwrap(), DbKind::Postgres);
        assert!("mysql".parse::<DbKind>().is_err());
    }

    #[test]
    fn open_dispatches_on_kind() {
        let db = open(DbKind::Postgres, ConnParams::new());
        assert_eq!(db.kind(), DbKind::Postgres);
        let db = open(DbKind::Oracle, ConnParams::new());
        assert_eq!(db.kind(), DbKind::Oracle);
    }

    #[test]
    fn overrides_win_over_ini_values() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"[pg]\nhost=db\nport=5432\n").unwrap();
        f.flush().unwrap();

        let params = connection_params(Some((f.path(), "pg")), &["port=6432"]).unwrap();
        assert_eq!(params.get("host"), Some("db"));
        assert_eq!(params.get("port"), Some("6432"));

        let params = connection_params(None, &["user=app"]).unwrap();
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn config_failures_surface_as_config_errors() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"[A]\nx=1\n").unwrap();
        f.flush().unwrap();

        let err = connection_params::<&str>(Some((f.path(), "B")), &[]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Config(ConfigError::SectionNotFound { ref section, .. }) if section == "B"
        ));
        assert!(err.to_string().contains("Section B not found"));

        let err = connection_params(None, &["novalue"]).unwrap_err();
        assert!(matches!(err, DbError::Config(ConfigError::InvalidPair(_))));
    }
}
