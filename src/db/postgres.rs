use crate::config::ConnParams;
use crate::db::ident::{quote_ident, quoted_column_list, TableName};
use crate::db::{Database, DbKind, UploadReport};
use crate::error::{DbError, Result};
use crate::table::{Table, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use postgres::config::SslMode;
use postgres::error::SqlState;
use postgres::types::{FromSql, Kind, ToSql, Type};
use postgres::{Client, Config, NoTls, Row, Statement, Transaction};
use std::error::Error as _;
use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CHUNK_ROWS: usize = 1000;
// The Bind message carries its parameter count in 16 bits
const MAX_BIND_PARAMS: usize = 65535;

/// PostgreSQL facade holding the connection parameters for its calls
pub struct PostgresDatabase {
    params: ConnParams,
}

impl PostgresDatabase {
    pub fn new(params: ConnParams) -> Self {
        Self { params }
    }
}

impl Database for PostgresDatabase {
    fn get_data(&self, sql: &str) -> Result<Table> {
        get_data(sql, &self.params)
    }

    fn upload_data(&self, table: &str, data: &Table) -> Result<UploadReport> {
        upload_data(table, data, &self.params)
    }

    fn execute(&self, sql: &str) -> Result<()> {
        execute_sql(sql, &self.params).map(|_| ())
    }

    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }
}

pub(crate) fn pg_config(params: &ConnParams) -> Result<Config> {
    let invalid = |key: &str, value: &str| {
        DbError::Connection(format!("invalid connection parameter {}={}", key, value))
    };

    let mut config = Config::new();
    config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);

    for (key, value) in params.iter() {
        match key {
            "host" => {
                config.host(value);
            }
            "port" => {
                let port = value.parse::<u16>().map_err(|_| invalid(key, value))?;
                config.port(port);
            }
            "user" | "username" => {
                config.user(value);
            }
            "password" => {
                config.password(value);
            }
            "dbname" | "database" => {
                config.dbname(value);
            }
            "application_name" => {
                config.application_name(value);
            }
            "options" => {
                config.options(value);
            }
            "connect_timeout" => {
                let secs = value.parse::<u64>().map_err(|_| invalid(key, value))?;
                config.connect_timeout(Duration::from_secs(secs));
            }
            "sslmode" => {
                let mode = match value {
                    "disable" => SslMode::Disable,
                    "prefer" | "allow" => SslMode::Prefer,
                    "require" => SslMode::Require,
                    _ => return Err(invalid(key, value)),
                };
                config.ssl_mode(mode);
            }
            other => warn!("Ignoring unknown PostgreSQL connection parameter '{}'", other),
        }
    }
    if config.get_ports().is_empty() {
        config.port(DEFAULT_PORT);
    }
    Ok(config)
}

fn connect(params: &ConnParams) -> Result<Client> {
    let config = pg_config(params)?;
    debug!(
        "Connecting to PostgreSQL at {:?}:{:?}",
        config.get_hosts(),
        config.get_ports()
    );
    config.connect(NoTls).map_err(|e| {
        let message = describe_error(&e);
        error!("PostgreSQL connection failed: {}", message);
        DbError::Connection(message)
    })
}

fn stmt_err(e: postgres::Error) -> DbError {
    DbError::Statement(describe_error(&e))
}

/// The server's own report when there is one, otherwise the error chain.
/// `postgres::Error` displays only its kind ("db error").
fn describe_error(e: &postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        return server_message(db.message(), db.detail(), db.code().code());
    }
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            let _ = write!(message, ": {}", cause_text);
        }
        source = cause.source();
    }
    message
}

fn server_message(message: &str, detail: Option<&str>, code: &str) -> String {
    match detail {
        Some(detail) => format!("{} ({}) [SQLSTATE {}]", message, detail, code),
        None => format!("{} [SQLSTATE {}]", message, code),
    }
}

/// Raised by the server when a prepared statement holds more than one command
fn is_multi_statement(e: &postgres::Error) -> bool {
    e.as_db_error()
        .map_or(false, |db| multi_statement_report(db.code(), db.message()))
}

fn multi_statement_report(code: &SqlState, message: &str) -> bool {
    *code == SqlState::SYNTAX_ERROR && message.contains("multiple commands")
}

/// Run `sql` in a transaction and return its rows with the column names
/// prepended as the first row.
///
/// Statements without result columns (DELETE, DDL) return a single empty
/// header row. The transaction is committed, so data-changing statements
/// take effect. Text holding several statements cannot be prepared; it runs
/// as one batch in the same kind of transaction and also returns only the
/// empty header row.
pub fn execute_sql(sql: &str, params: &ConnParams) -> Result<Vec<Vec<Value>>> {
    let mut client = connect(params)?;

    let stmt = match client.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) if is_multi_statement(&e) => return execute_batch(&mut client, sql),
        Err(e) => return Err(stmt_err(e)),
    };
    let mut tx = client.transaction().map_err(stmt_err)?;
    let columns: Vec<(String, Type)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.type_().clone()))
        .collect();
    let header: Vec<Value> = columns
        .iter()
        .map(|(name, _)| Value::Text(name.clone()))
        .collect();

    let mut output = vec![header];
    if columns.is_empty() {
        let affected = tx.execute(&stmt, &[]).map_err(stmt_err)?;
        info!("Statement executed on PostgreSQL, {} rows affected", affected);
    } else {
        let rows = tx.query(&stmt, &[]).map_err(stmt_err)?;
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, (name, ty)) in columns.iter().enumerate() {
                values.push(decode_cell(row, idx, ty, name)?);
            }
            output.push(values);
        }
        info!("Fetched {} rows from PostgreSQL", rows.len());
    }

    tx.commit().map_err(stmt_err)?;
    Ok(output)
}

fn execute_batch(client: &mut Client, sql: &str) -> Result<Vec<Vec<Value>>> {
    debug!("Running multi-statement SQL as a batch");
    let mut tx = client.transaction().map_err(stmt_err)?;
    tx.batch_execute(sql).map_err(stmt_err)?;
    tx.commit().map_err(stmt_err)?;
    info!("Statement batch executed on PostgreSQL");
    Ok(vec![Vec::new()])
}

/// Query into a table: the header row of `execute_sql` becomes the columns
pub fn get_data(sql: &str, params: &ConnParams) -> Result<Table> {
    Table::from_header_rows(execute_sql(sql, params)?)
}

fn decode_cell(row: &Row, idx: usize, ty: &Type, column: &str) -> Result<Value> {
    let value = if *ty == Type::BOOL {
        get::<bool>(row, idx)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx)?.map(|v| Value::Int(v.into()))
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx)?.map(|v| Value::Int(v.into()))
    } else if *ty == Type::INT8 {
        get::<i64>(row, idx)?.map(Value::Int)
    } else if *ty == Type::OID {
        get::<u32>(row, idx)?.map(|v| Value::Int(v.into()))
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, idx)?.map(|v| Value::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, idx)?.map(Value::Float)
    } else if *ty == Type::NUMERIC {
        get::<PgNumeric>(row, idx)?.map(|n| Value::Numeric(n.0))
    } else if *ty == Type::DATE {
        get::<NaiveDate>(row, idx)?.map(Value::Date)
    } else if *ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp)
    } else if *ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, idx)?.map(|ts| Value::Timestamp(ts.naive_utc()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<serde_json::Value>(row, idx)?.map(|j| Value::Text(j.to_string()))
    } else if *ty == Type::UUID {
        get::<Uuid>(row, idx)?.map(|u| Value::Text(u.to_string()))
    } else if *ty == Type::TIME {
        get::<NaiveTime>(row, idx)?.map(|t| Value::Text(t.to_string()))
    } else if *ty == Type::INTERVAL {
        get::<PgInterval>(row, idx)?.map(|i| Value::Text(i.0))
    } else if *ty == Type::BYTEA {
        get::<&[u8]>(row, idx)?.map(|b| Value::Text(hex_bytes(b)))
    } else if <String as FromSql>::accepts(ty) {
        get::<String>(row, idx)?.map(Value::Text)
    } else if let Kind::Array(elem) = ty.kind() {
        decode_array(row, idx, elem)?.map(Value::Text)
    } else {
        debug!("Column {} of type {} read from its raw value", column, ty.name());
        get::<PgRaw>(row, idx)?.map(|r| Value::Text(r.0))
    };
    Ok(value.unwrap_or(Value::Null))
}

/// One-dimensional arrays in PostgreSQL's `{a,b,NULL}` text form
fn decode_array(row: &Row, idx: usize, elem: &Type) -> Result<Option<String>> {
    fn plain<T: ToString>(items: Vec<Option<T>>) -> Vec<Option<String>> {
        items.into_iter().map(|v| v.map(|v| v.to_string())).collect()
    }

    let (items, quoted): (Option<Vec<Option<String>>>, bool) = if *elem == Type::BOOL {
        let items = get::<Vec<Option<bool>>>(row, idx)?;
        (items.map(|v| {
            v.into_iter()
                .map(|b| b.map(|b| if b { "t" } else { "f" }.to_string()))
                .collect()
        }), false)
    } else if *elem == Type::INT2 {
        (get::<Vec<Option<i16>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::INT4 {
        (get::<Vec<Option<i32>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::INT8 {
        (get::<Vec<Option<i64>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::FLOAT4 {
        (get::<Vec<Option<f32>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::FLOAT8 {
        (get::<Vec<Option<f64>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::NUMERIC {
        let items = get::<Vec<Option<PgNumeric>>>(row, idx)?;
        (items.map(|v| v.into_iter().map(|n| n.map(|n| n.0)).collect()), false)
    } else if *elem == Type::UUID {
        (get::<Vec<Option<Uuid>>>(row, idx)?.map(plain), false)
    } else if *elem == Type::DATE {
        (get::<Vec<Option<NaiveDate>>>(row, idx)?.map(plain), false)
    } else if <String as FromSql>::accepts(elem) {
        (get::<Vec<Option<String>>>(row, idx)?, true)
    } else {
        (get::<Vec<Option<PgRaw>>>(row, idx)?.map(|v| {
            v.into_iter().map(|r| r.map(|r| r.0)).collect()
        }), true)
    };
    Ok(items.map(|items| array_literal(&items, quoted)))
}

fn array_literal(items: &[Option<String>], quoted: bool) -> String {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            None => out.push_str("NULL"),
            Some(text) if quoted && needs_quotes(text) => {
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            Some(text) => out.push_str(text),
        }
    }
    out.push('}');
    out
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | ',' | '"' | '\\'))
}

/// BYTEA in PostgreSQL's hex output form
fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(stmt_err)
}

/// NUMERIC in its exact decimal text form
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgNumeric(numeric_to_string(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// INTERVAL rendered the way PostgreSQL prints it by default
struct PgInterval(String);

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgInterval(interval_to_string(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// Any type, decoded from its binary value. Enums, citext and other
/// text-like extension types send their text; anything else becomes hex.
struct PgRaw(String);

impl<'a> FromSql<'a> for PgRaw {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgRaw(raw_text(raw)))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn raw_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.to_string()
        }
        _ => hex_bytes(raw),
    }
}

/// Binary INTERVAL: microseconds (i64), days (i32), months (i32)
fn interval_to_string(raw: &[u8]) -> std::result::Result<String, String> {
    if raw.len() != 16 {
        return Err(format!("invalid interval length {}", raw.len()));
    }
    let mut micros_be = [0u8; 8];
    micros_be.copy_from_slice(&raw[0..8]);
    let micros = i64::from_be_bytes(micros_be);
    let days = i32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
    let months = i32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]);

    let mut parts = Vec::new();
    let unit = |n: i64, name: &str| {
        if n == 1 {
            format!("{} {}", n, name)
        } else {
            format!("{} {}s", n, name)
        }
    };
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon"));
    }
    if days != 0 {
        parts.push(unit(days.into(), "day"));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let secs = total / 1_000_000;
        let frac = total % 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if frac != 0 {
            let digits = format!("{:06}", frac);
            let _ = write!(clock, ".{}", digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    Ok(parts.join(" "))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary NUMERIC wire format: ndigits, weight, sign, dscale, then
/// base-10000 digits, all big-endian 16-bit.
fn numeric_to_string(raw: &[u8]) -> std::result::Result<String, String> {
    let word = |i: usize| -> std::result::Result<u16, String> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".to_string())
    };

    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i32;
    let sign = word(2)?;
    let dscale = word(3)? as usize;
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<u16>, String>>()?;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digit_at = |pos: i32| -> u16 {
        if pos >= 0 {
            digits.get(pos as usize).copied().unwrap_or(0)
        } else {
            0
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            let d = digit_at(pos);
            if pos == 0 {
                let _ = write!(out, "{}", d);
            } else {
                let _ = write!(out, "{:04}", d);
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let groups = dscale.div_ceil(4) as i32;
        for k in 1..=groups {
            let _ = write!(frac, "{:04}", digit_at(weight + k));
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// Types bound with their native Rust counterpart; everything else is sent
/// as text and cast on the server
fn binds_natively(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::TEXT,
        Type::VARCHAR,
        Type::BPCHAR,
        Type::NAME,
        Type::DATE,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
    ]
    .contains(ty)
}

fn type_sql_name(ty: &Type) -> String {
    if ty.schema() == "pg_catalog" {
        ty.name().to_string()
    } else {
        format!("{}.{}", quote_ident(ty.schema()), quote_ident(ty.name()))
    }
}

fn placeholder(idx: usize, ty: &Type) -> String {
    if binds_natively(ty) {
        format!("${}::{}", idx, type_sql_name(ty))
    } else {
        format!("${}::text::{}", idx, type_sql_name(ty))
    }
}

/// Multi-row INSERT for `rows` rows; column names are quoted literals and
/// only the values are bound
pub(crate) fn insert_sql(table: &str, columns: &[String], types: &[Type], rows: usize) -> String {
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, quoted_column_list(columns));
    let mut idx = 1;
    for r in 0..rows {
        if r > 0 {
            sql.push_str(", ");
        }
        let tuple = types
            .iter()
            .map(|ty| {
                let p = placeholder(idx, ty);
                idx += 1;
                p
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(sql, "({})", tuple);
    }
    sql
}

fn rows_per_chunk(columns: usize) -> usize {
    if columns == 0 {
        return CHUNK_ROWS;
    }
    CHUNK_ROWS.min(MAX_BIND_PARAMS / columns).max(1)
}

/// Insert `data` into `table` (schema `public` unless qualified).
///
/// The destination column count comes from preparing
/// `SELECT * FROM "<schema>"."<table>" LIMIT 1`; a payload with a different
/// number of columns is rejected and nothing is inserted. Rows go in as
/// multi-row INSERT chunks within one transaction, committed once, so a
/// failure at any row leaves the table untouched.
pub fn upload_data(table: &str, data: &Table, params: &ConnParams) -> Result<UploadReport> {
    let table = TableName::parse(table)?;
    let qualified = table.quoted(DEFAULT_SCHEMA);
    let data = data.normalize_nulls();

    let mut client = connect(params)?;
    let mut tx = client.transaction().map_err(stmt_err)?;

    let descriptor_sql = format!("SELECT * FROM {} LIMIT 1", qualified);
    let descriptor_stmt = tx.prepare(&descriptor_sql).map_err(stmt_err)?;
    let columns: Vec<String> = descriptor_stmt
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let types: Vec<Type> = descriptor_stmt
        .columns()
        .iter()
        .map(|c| c.type_().clone())
        .collect();

    if columns.len() != data.column_count() {
        warn!(
            "Number of upload columns does not match: {} has {}, data has {}",
            qualified,
            columns.len(),
            data.column_count()
        );
        return Err(DbError::SchemaMismatch {
            table: qualified,
            expected: columns.len(),
            found: data.column_count(),
        });
    }

    let rows_inserted = match insert_chunks(&mut tx, &qualified, &columns, &types, &data) {
        Ok(n) => n,
        Err(e) => {
            // dropping the transaction rolls it back
            error!("Error while uploading to {}: {}", qualified, e);
            return Err(e);
        }
    };

    tx.commit().map_err(stmt_err)?;
    info!("Uploaded {} rows into {}", rows_inserted, qualified);
    Ok(UploadReport { rows_inserted })
}

fn insert_chunks(
    tx: &mut Transaction<'_>,
    table: &str,
    columns: &[String],
    types: &[Type],
    data: &Table,
) -> Result<u64> {
    let chunk_rows = rows_per_chunk(columns.len());
    let mut full_stmt: Option<Statement> = None;
    let mut inserted = 0;

    for chunk in data.rows().chunks(chunk_rows) {
        let full = chunk.len() == chunk_rows;
        let stmt = match full_stmt.as_ref() {
            Some(stmt) if full => Statement::clone(stmt),
            _ => {
                let sql = insert_sql(table, columns, types, chunk.len());
                debug!("Chunk insert of {} rows: {}", chunk.len(), sql);
                tx.prepare(&sql).map_err(stmt_err)?
            }
        };
        if full && full_stmt.is_none() {
            full_stmt = Some(stmt.clone());
        }

        let mut owned: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(chunk.len() * columns.len());
        for row in chunk {
            for ((value, ty), column) in row.iter().zip(types).zip(columns) {
                owned.push(bind_value(value, ty, column)?);
            }
        }
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();
        inserted += tx.execute(&stmt, &refs).map_err(stmt_err)?;
    }
    Ok(inserted)
}

/// Coerce `value` to what the destination column of type `ty` accepts
fn bind_value(value: &Value, ty: &Type, column: &str) -> Result<Box<dyn ToSql + Sync>> {
    let bound = coerce(value, ty);
    bound.map_err(|message| DbError::Value {
        column: column.to_string(),
        message,
    })
}

fn coerce(value: &Value, ty: &Type) -> std::result::Result<Box<dyn ToSql + Sync>, String> {
    let boxed: Box<dyn ToSql + Sync> = if *ty == Type::BOOL {
        Box::new(to_bool(value)?)
    } else if *ty == Type::INT2 {
        Box::new(narrow::<i16>(to_i64(value)?)?)
    } else if *ty == Type::INT4 {
        Box::new(narrow::<i32>(to_i64(value)?)?)
    } else if *ty == Type::INT8 {
        Box::new(to_i64(value)?)
    } else if *ty == Type::FLOAT4 {
        Box::new(to_f64(value)?.map(|f| f as f32))
    } else if *ty == Type::FLOAT8 {
        Box::new(to_f64(value)?)
    } else if *ty == Type::DATE {
        Box::new(to_date(value)?)
    } else if *ty == Type::TIMESTAMP {
        Box::new(to_timestamp(value)?)
    } else if *ty == Type::TIMESTAMPTZ {
        Box::new(to_timestamp(value)?.map(|ts| Utc.from_utc_datetime(&ts)))
    } else {
        // text columns, and the ::text:: cast path for everything else
        Box::new(to_text(value))
    };
    Ok(boxed)
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn to_bool(value: &Value) -> std::result::Result<Option<bool>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Int(i) => Ok(Some(*i != 0)),
        Value::Text(s) | Value::Numeric(s) => match s.trim().to_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(Some(true)),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("{} is not a boolean", other.type_name())),
    }
}

fn to_i64(value: &Value) -> std::result::Result<Option<i64>, String> {
    let integral = |f: f64| {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            Ok(f as i64)
        } else {
            Err(format!("{} is not an integer", f))
        }
    };
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(i64::from(*b))),
        Value::Int(i) => Ok(Some(*i)),
        Value::Float(f) => integral(*f).map(Some),
        Value::Text(s) | Value::Numeric(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(Some(i)),
                Err(_) => s
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not an integer", s))
                    .and_then(integral)
                    .map(Some),
            }
        }
        other => Err(format!("{} is not an integer", other.type_name())),
    }
}

fn narrow<T: TryFrom<i64>>(value: Option<i64>) -> std::result::Result<Option<T>, String> {
    value
        .map(|i| T::try_from(i).map_err(|_| format!("{} is out of range", i)))
        .transpose()
}

fn to_f64(value: &Value) -> std::result::Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Int(i) => Ok(Some(*i as f64)),
        Value::Float(f) => Ok(Some(*f)),
        Value::Text(s) | Value::Numeric(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("{} is not a number", other.type_name())),
    }
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn to_timestamp(value: &Value) -> std::result::Result<Option<NaiveDateTime>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Timestamp(ts) => Ok(Some(*ts)),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0)),
        Value::Text(s) => {
            let s = s.trim();
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Some)
                .ok_or_else(|| format!("'{}' is not a timestamp", s))
        }
        other => Err(format!("{} is not a timestamp", other.type_name())),
    }
}

fn to_date(value: &Value) -> std::result::Result<Option<NaiveDate>, String> {
    match value {
        Value::Date(d) => Ok(Some(*d)),
        other => to_timestamp(other)
            .map(|ts| ts.map(|ts| ts.date()))
            .map_err(|_| format!("{} is not a date", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ConnParams {
        pairs.iter().copied().collect()
    }

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn config_maps_psycopg_style_keys() {
        let p = params(&[
            ("host", "localhost"),
            ("port", "5433"),
            ("user", "app"),
            ("password", "secret"),
            ("database", "sales"),
            ("connect_timeout", "3"),
        ]);
        let cfg = pg_config(&p).unwrap();
        assert_eq!(cfg.get_ports(), &[5433]);
        assert_eq!(cfg.get_user(), Some("app"));
        assert_eq!(cfg.get_dbname(), Some("sales"));
        assert_eq!(cfg.get_connect_timeout(), Some(&Duration::from_secs(3)));
    }

    #[test]
    fn config_rejects_bad_port_and_sslmode() {
        assert!(pg_config(&params(&[("port", "abc")])).unwrap_err().is_connection());
        assert!(pg_config(&params(&[("sslmode", "sometimes")]))
            .unwrap_err()
            .is_connection());
        // unknown keys are only logged
        assert!(pg_config(&params(&[("fallback_application_name", "x")])).is_ok());
    }

    #[test]
    fn unreachable_host_returns_error() {
        let p = params(&[
            ("host", "127.0.0.1"),
            ("port", "1"),
            ("user", "nobody"),
            ("connect_timeout", "2"),
        ]);
        assert!(execute_sql("select 1", &p).unwrap_err().is_connection());
        assert!(get_data("select 1", &p).unwrap_err().is_connection());

        let data = Table::new(vec!["a".into()]);
        assert!(upload_data("t", &data, &p).unwrap_err().is_connection());
    }

    #[test]
    fn insert_sql_casts_each_placeholder() {
        let cols = vec!["id".to_string(), "Name".to_string(), "amount".to_string()];
        let types = vec![Type::INT4, Type::TEXT, Type::NUMERIC];
        let sql = insert_sql("\"public\".\"sales\"", &cols, &types, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"sales\" (\"id\", \"Name\", \"amount\") VALUES \
             ($1::int4, $2::text, $3::text::numeric), ($4::int4, $5::text, $6::text::numeric)"
        );
    }

    #[test]
    fn single_column_insert() {
        let sql = insert_sql("\"public\".\"t\"", &["v".to_string()], &[Type::FLOAT8], 1);
        assert_eq!(sql, "INSERT INTO \"public\".\"t\" (\"v\") VALUES ($1::float8)");
    }

    #[test]
    fn chunks_respect_bind_limit() {
        assert_eq!(rows_per_chunk(3), 1000);
        assert_eq!(rows_per_chunk(100), 655);
        assert_eq!(rows_per_chunk(70_000), 1);
        assert_eq!(rows_per_chunk(0), 1000);
    }

    fn interval_bytes(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&micros.to_be_bytes());
        raw.extend_from_slice(&days.to_be_bytes());
        raw.extend_from_slice(&months.to_be_bytes());
        raw
    }

    #[test]
    fn server_errors_keep_message_detail_and_code() {
        assert_eq!(
            server_message("relation \"no_such_table_xyz\" does not exist", None, "42P01"),
            "relation \"no_such_table_xyz\" does not exist [SQLSTATE 42P01]"
        );
        assert_eq!(
            server_message(
                "duplicate key value violates unique constraint \"t_pkey\"",
                Some("Key (id)=(1) already exists."),
                "23505"
            ),
            "duplicate key value violates unique constraint \"t_pkey\" \
             (Key (id)=(1) already exists.) [SQLSTATE 23505]"
        );
    }

    #[test]
    fn multi_statement_rejection_is_recognized() {
        assert!(multi_statement_report(
            &SqlState::SYNTAX_ERROR,
            "cannot insert multiple commands into a prepared statement"
        ));
        assert!(!multi_statement_report(
            &SqlState::SYNTAX_ERROR,
            "syntax error at or near \"SELEC\""
        ));
        assert!(!multi_statement_report(
            &SqlState::UNDEFINED_TABLE,
            "relation \"multiple commands\" does not exist"
        ));
    }

    #[test]
    fn interval_decoding() {
        let hour = 3_600_000_000;
        let micros = 4 * hour + 5 * 60_000_000 + 6_500_000;
        assert_eq!(
            interval_to_string(&interval_bytes(micros, 3, 14)).unwrap(),
            "1 year 2 mons 3 days 04:05:06.5"
        );
        assert_eq!(interval_to_string(&interval_bytes(0, 1, 0)).unwrap(), "1 day");
        assert_eq!(interval_to_string(&interval_bytes(0, 0, 0)).unwrap(), "00:00:00");
        assert_eq!(
            interval_to_string(&interval_bytes(-hour, 0, -24)).unwrap(),
            "-2 years -01:00:00"
        );
        assert_eq!(interval_to_string(&interval_bytes(30 * hour, 0, 0)).unwrap(), "30:00:00");
        assert!(interval_to_string(&[0; 4]).is_err());
    }

    #[test]
    fn bytea_and_raw_values_render_as_text() {
        assert_eq!(hex_bytes(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(hex_bytes(&[]), "\\x");
        // enum labels and citext arrive as plain text
        assert_eq!(raw_text(b"pending"), "pending");
        assert_eq!(raw_text(&[0x02, 0x20, 0x0a, 0x00]), "\\x02200a00");
        assert_eq!(raw_text(&[0xff, 0xfe]), "\\xfffe");
    }

    #[test]
    fn arrays_use_postgres_text_form() {
        let ints = vec![Some("1".to_string()), None, Some("3".to_string())];
        assert_eq!(array_literal(&ints, false), "{1,NULL,3}");
        assert_eq!(array_literal(&[], false), "{}");

        let words = vec![
            Some("plain".to_string()),
            Some("two words".to_string()),
            Some("a\"b".to_string()),
            Some(String::new()),
            Some("null".to_string()),
            None,
        ];
        assert_eq!(
            array_literal(&words, true),
            "{plain,\"two words\",\"a\\\"b\",\"\",\"null\",NULL}"
        );
    }

    #[test]
    fn numeric_decoding() {
        // 12345.678
        let raw = numeric_bytes(1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "12345.678");
        // -0.0001
        let raw = numeric_bytes(-1, NUMERIC_NEG, 4, &[1]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "-0.0001");
        // 0.5
        let raw = numeric_bytes(-1, 0, 1, &[5000]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "0.5");
        // 0
        let raw = numeric_bytes(0, 0, 0, &[]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "0");
        // 20000 stored with trailing zero groups stripped
        let raw = numeric_bytes(1, 0, 2, &[2]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "20000.00");
        let raw = numeric_bytes(0, NUMERIC_NAN, 0, &[]);
        assert_eq!(numeric_to_string(&raw).unwrap(), "NaN");
        assert!(numeric_to_string(&[0, 1]).is_err());
    }

    #[test]
    fn coercion_follows_destination_type() {
        assert_eq!(to_i64(&Value::Text(" 42 ".into())).unwrap(), Some(42));
        assert_eq!(to_i64(&Value::Float(3.0)).unwrap(), Some(3));
        assert!(to_i64(&Value::Float(3.5)).is_err());
        assert_eq!(to_i64(&Value::Null).unwrap(), None);
        assert!(narrow::<i16>(Some(70_000)).is_err());

        assert_eq!(to_bool(&Value::Text("Yes".into())).unwrap(), Some(true));
        assert!(to_bool(&Value::Text("maybe".into())).is_err());

        assert_eq!(to_f64(&Value::Numeric("1.25".into())).unwrap(), Some(1.25));
        assert_eq!(to_text(&Value::Int(7)), Some("7".to_string()));
        assert_eq!(to_text(&Value::Null), None);

        let d = NaiveDate::from_ymd_opt(2021, 6, 17).unwrap();
        assert_eq!(to_date(&Value::Text("2021-06-17".into())).unwrap(), Some(d));
        assert_eq!(
            to_timestamp(&Value::Text("2021-06-17T10:00:00".into())).unwrap(),
            d.and_hms_opt(10, 0, 0)
        );
        assert!(to_date(&Value::Bool(true)).is_err());
    }

    #[test]
    fn bind_errors_name_the_column() {
        let err = bind_value(&Value::Text("abc".into()), &Type::INT4, "qty")
            .err()
            .unwrap();
        match err {
            DbError::Value { column, .. } => assert_eq!(column, "qty"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(bind_value(&Value::Null, &Type::UUID, "id").is_ok());
    }
}
