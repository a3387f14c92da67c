use crate::table::{Table, Value};
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::debug;

/// Read a delimited file whose first record is the header.
///
/// Empty fields become NULL; integers and floats are recognised, anything
/// else stays text.
pub fn read_csv(path: impl AsRef<Path>, delimiter: u8) -> Result<Table> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let columns: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = Table::new(columns);

    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad record {} in {}", line + 1, path.display()))?;
        let row = record.iter().map(parse_field).collect();
        table
            .push_row(row)
            .with_context(|| format!("Bad record {} in {}", line + 1, path.display()))?;
    }

    debug!("Read {} rows from {}", table.row_count(), path.display());
    Ok(table)
}

fn parse_field(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = field.parse::<i64>() {
        return Value::Int(i);
    }
    match field.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Float(f),
        _ => Value::Text(field.to_string()),
    }
}
