use crate::config::ConnParams;
use crate::db::ident::{quoted_column_list, TableName};
use crate::db::{Database, DbKind, UploadReport};
use crate::error::{DbError, Result};
use crate::table::{Table, Value};
use chrono::NaiveDateTime;
use oracle::sql_type::{OracleType, ToSql};
use oracle::{ColumnInfo, Connection, Row};
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: &str = "1521";
const BATCH_SIZE: usize = 1000;

/// Oracle facade holding the connection parameters for its calls
pub struct OracleDatabase {
    params: ConnParams,
}

impl OracleDatabase {
    pub fn new(params: ConnParams) -> Self {
        Self { params }
    }
}

impl Database for OracleDatabase {
    fn get_data(&self, sql: &str) -> Result<Table> {
        get_data(sql, &self.params)
    }

    fn upload_data(&self, table: &str, data: &Table) -> Result<UploadReport> {
        upload_data(table, data, &self.params)
    }

    fn execute(&self, sql: &str) -> Result<()> {
        execute_sql(sql, &self.params)
    }

    fn kind(&self) -> DbKind {
        DbKind::Oracle
    }
}

/// User, password and connect string derived from the parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectDescriptor {
    pub user: String,
    pub password: String,
    pub connect_string: String,
}

pub(crate) fn connect_descriptor(params: &ConnParams) -> Result<ConnectDescriptor> {
    let missing = |key: &str| DbError::Connection(format!("missing connection parameter '{}'", key));

    let user = params.get_any(&["user", "username"]).ok_or_else(|| missing("user"))?;
    let password = params.get("password").ok_or_else(|| missing("password"))?;

    let connect_string = match params.get_any(&["dsn", "connect_string"]) {
        Some(dsn) => dsn.to_string(),
        None => {
            // host:port/service_name, with the // prefix of an easy connect string
            let host = params.get("host").ok_or_else(|| missing("host"))?;
            let port = params.get("port").unwrap_or(DEFAULT_PORT);
            match params.get_any(&["service_name", "database", "sid"]) {
                Some(service) => format!("//{}:{}/{}", host, port, service),
                None => format!("//{}:{}", host, port),
            }
        }
    };

    Ok(ConnectDescriptor {
        user: user.to_string(),
        password: password.to_string(),
        connect_string,
    })
}

fn connect(params: &ConnParams) -> Result<Connection> {
    let desc = connect_descriptor(params)?;
    debug!(
        "Connecting to Oracle at {} as {}",
        desc.connect_string, desc.user
    );
    Connection::connect(&desc.user, &desc.password, &desc.connect_string).map_err(|e| {
        error!("Oracle connection failed: {}", e);
        DbError::Connection(e.to_string())
    })
}

fn stmt_err(e: oracle::Error) -> DbError {
    DbError::Statement(e.to_string())
}

/// Oracle rejects a trailing `;` on plain SQL; PL/SQL blocks keep theirs
fn clean_sql(sql: &str) -> &str {
    let sql = sql.trim();
    if is_plsql(sql) {
        return sql;
    }
    sql.strip_suffix(';').map(str::trim_end).unwrap_or(sql)
}

const PLSQL_UNITS: [&str; 6] = ["PROCEDURE", "FUNCTION", "PACKAGE", "TRIGGER", "TYPE", "LIBRARY"];

/// Anonymous blocks and stored-unit DDL, judged by the leading keywords
fn is_plsql(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    let mut words = upper.split_whitespace();
    match words.next() {
        Some("BEGIN") | Some("DECLARE") => true,
        Some("CREATE") => {
            let mut word = words.next();
            if word == Some("OR") {
                // OR REPLACE
                words.next();
                word = words.next();
            }
            if matches!(word, Some("EDITIONABLE") | Some("NONEDITIONABLE")) {
                word = words.next();
            }
            word.map_or(false, |w| PLSQL_UNITS.contains(&w))
        }
        _ => false,
    }
}

/// Run `sql` and return every row together with the descriptor's column names.
///
/// A query without rows gives an empty table that still carries its columns.
pub fn get_data(sql: &str, params: &ConnParams) -> Result<Table> {
    let conn = connect(params)?;
    let mut stmt = conn.statement(clean_sql(sql)).build().map_err(stmt_err)?;
    let rows = stmt.query(&[]).map_err(stmt_err)?;

    let (columns, types) = describe(rows.column_info());
    let mut table = Table::new(columns);

    for row_result in rows {
        let row = row_result.map_err(stmt_err)?;
        let mut values = Vec::with_capacity(types.len());
        for (idx, ty) in types.iter().enumerate() {
            values.push(decode_cell(&row, idx, ty).map_err(stmt_err)?);
        }
        table.push_row(values)?;
    }

    info!("Fetched {} rows from Oracle", table.row_count());
    Ok(table)
}

/// Column names and types from a result descriptor
fn describe(info: &[ColumnInfo]) -> (Vec<String>, Vec<OracleType>) {
    info.iter()
        .map(|c| (c.name().to_string(), c.oracle_type().clone()))
        .unzip()
}

fn decode_cell(row: &Row, idx: usize, ty: &OracleType) -> oracle::Result<Value> {
    let value = match ty {
        OracleType::Int64 => row.get::<_, Option<i64>>(idx)?.map(Value::Int),
        OracleType::Number(prec, 0) if (1..=18).contains(prec) => {
            row.get::<_, Option<i64>>(idx)?.map(Value::Int)
        }
        OracleType::Number(..) | OracleType::Float(_) => {
            row.get::<_, Option<String>>(idx)?.map(numeric_value)
        }
        OracleType::BinaryFloat | OracleType::BinaryDouble => {
            row.get::<_, Option<f64>>(idx)?.map(Value::Float)
        }
        OracleType::Boolean => row.get::<_, Option<bool>>(idx)?.map(Value::Bool),
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => row
            .get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::Timestamp),
        _ => row.get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Unconstrained NUMBER columns often hold plain integers
fn numeric_value(text: String) -> Value {
    match text.parse::<i64>() {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Numeric(text),
    }
}

pub(crate) fn insert_sql(table: &TableName, columns: &[String]) -> String {
    let placeholders = (1..=columns.len())
        .map(|i| format!(":{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {}({}) VALUES ({})",
        table.bare(),
        quoted_column_list(columns),
        placeholders
    )
}

fn bind_value(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(i64::from(*b)),
        Value::Int(i) => Box::new(*i),
        Value::Float(f) => Box::new(*f),
        Value::Numeric(s) | Value::Text(s) => Box::new(s.clone()),
        Value::Date(d) => Box::new(d.and_hms_opt(0, 0, 0)),
        Value::Timestamp(ts) => Box::new(*ts),
    }
}

/// Destination types that are safe to pin on the batch up front, so that a
/// NULL in the first row does not decide the bind type for the whole batch
fn batch_type(ty: &OracleType) -> Option<OracleType> {
    match ty {
        OracleType::Varchar2(_)
        | OracleType::NVarchar2(_)
        | OracleType::Char(_)
        | OracleType::NChar(_)
        | OracleType::Number(..)
        | OracleType::Float(_)
        | OracleType::BinaryFloat
        | OracleType::BinaryDouble
        | OracleType::Date
        | OracleType::Timestamp(_) => Some(ty.clone()),
        _ => None,
    }
}

/// Insert every row of `data` into `table` as one batch and commit once.
///
/// The destination's column names and types come from an introspective
/// query that fetches no rows. A payload whose column count differs from the
/// destination is rejected before anything is sent.
pub fn upload_data(table: &str, data: &Table, params: &ConnParams) -> Result<UploadReport> {
    let table = TableName::parse(table)?;
    let data = data.normalize_nulls();
    let conn = connect(params)?;

    match insert_rows(&conn, &table, &data) {
        Ok(rows_inserted) => {
            conn.commit().map_err(stmt_err)?;
            info!("Uploaded {} rows into {}", rows_inserted, table.bare());
            Ok(UploadReport { rows_inserted })
        }
        Err(e) => {
            error!("Upload into {} failed: {}", table.bare(), e);
            if let Err(rb) = conn.rollback() {
                warn!("Rollback failed: {}", rb);
            }
            Err(e)
        }
    }
}

fn insert_rows(conn: &Connection, table: &TableName, data: &Table) -> Result<u64> {
    let descriptor_sql = format!("SELECT * FROM {} WHERE 1 = 0", table.bare());
    let mut stmt = conn.statement(&descriptor_sql).build().map_err(stmt_err)?;
    let rows = stmt.query(&[]).map_err(stmt_err)?;
    let (columns, types) = describe(rows.column_info());
    drop(rows);

    if columns.len() != data.column_count() {
        warn!(
            "Number of upload columns does not match: {} has {}, data has {}",
            table.bare(),
            columns.len(),
            data.column_count()
        );
        return Err(DbError::SchemaMismatch {
            table: table.bare(),
            expected: columns.len(),
            found: data.column_count(),
        });
    }
    if data.is_empty() {
        return Ok(0);
    }

    let sql = insert_sql(table, &columns);
    debug!("Batch insert: {}", sql);

    let mut batch = conn
        .batch(&sql, BATCH_SIZE.min(data.row_count()))
        .build()
        .map_err(stmt_err)?;
    for (idx, ty) in types.iter().enumerate() {
        if let Some(ty) = batch_type(ty) {
            batch.set_type(idx + 1, &ty).map_err(stmt_err)?;
        }
    }

    for row in data.rows() {
        let owned: Vec<Box<dyn ToSql>> = row.iter().map(bind_value).collect();
        let refs: Vec<&dyn ToSql> = owned.iter().map(|b| b.as_ref()).collect();
        batch.append_row(&refs).map_err(stmt_err)?;
    }
    batch.execute().map_err(stmt_err)?;

    Ok(data.row_count() as u64)
}

/// Run and commit an arbitrary statement such as DELETE or TRUNCATE
pub fn execute_sql(sql: &str, params: &ConnParams) -> Result<()> {
    let conn = connect(params)?;
    let stmt = conn.execute(clean_sql(sql), &[]).map_err(stmt_err)?;
    let affected = stmt.row_count().map_err(stmt_err)?;
    conn.commit().map_err(stmt_err)?;
    info!("Statement executed on Oracle, {} rows affected", affected);
    Ok(())
}
