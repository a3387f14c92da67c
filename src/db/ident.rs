//! Table-name validation and identifier quoting shared by both adapters.
//!
//! Table names are spliced into statement text, so they are checked against
//! a conservative character set before any SQL is built.

use crate::error::{DbError, Result};

const MAX_IDENT_LEN: usize = 128;

/// A validated `table` or `schema.table` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let mut parts = input.split('.');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(DbError::InvalidIdentifier(input.to_string()));
        }

        let (schema, name) = match second {
            Some(table) => (Some(first), table),
            None => (None, first),
        };
        if let Some(schema) = schema {
            validate_part(schema, input)?;
        }
        validate_part(name, input)?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unquoted form, letting the database apply its own case folding
    pub fn bare(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Quoted form with `default_schema` filled in when none was given
    pub fn quoted(&self, default_schema: &str) -> String {
        let schema = self.schema.as_deref().unwrap_or(default_schema);
        format!("{}.{}", quote_ident(schema), quote_ident(&self.name))
    }
}

fn validate_part(part: &str, whole: &str) -> Result<()> {
    let valid = !part.is_empty()
        && part.len() <= MAX_IDENT_LEN
        && !part.starts_with(|c: char| c.is_ascii_digit())
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(whole.to_string()))
    }
}

/// Wrap an identifier in double quotes, doubling any embedded quote
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Comma-separated list of quoted column names
pub fn quoted_column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}
