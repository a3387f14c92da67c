use crate::error::ConfigError;
use ini::{Ini, ParseOption};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

const DEFAULT_SECTION: &str = "DEFAULT";

/// Flat key/value connection parameters (host, port, user, password, ...)
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnParams {
    values: BTreeMap<String, String>,
}

impl ConnParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` strings as given on the command line
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidPair(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::InvalidPair(pair.to_string()));
            }
            params.insert(key, value.trim());
        }
        Ok(params)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into().to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// First present key among `keys`
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.values
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConnParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

// Keep credentials out of logs
impl fmt::Debug for ConnParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in &self.values {
            if k.contains("password") {
                map.entry(k, &"***");
            } else {
                map.entry(k, v);
            }
        }
        map.finish()
    }
}

/// Read the connection parameters stored in `section` of an INI file.
///
/// Keys are lower-cased and values from `[DEFAULT]` are inherited. A missing
/// section is an error rather than an empty result, so a typo in the section
/// name does not turn into a confusing connect failure later on.
pub fn get_config_param(
    filepath: impl AsRef<Path>,
    section: &str,
) -> Result<ConnParams, ConfigError> {
    let path = filepath.as_ref();
    let read_err = |message: String| ConfigError::Read {
        path: path.display().to_string(),
        message,
    };
    let text = fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
    let opt = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(&strip_comment_lines(&text), opt)
        .map_err(|e| read_err(e.to_string()))?;
    section_params(&ini, section).ok_or_else(|| ConfigError::SectionNotFound {
        section: section.to_string(),
        path: path.display().to_string(),
    })
}

/// Drop full-line comments, indented ones included; rust-ini only
/// recognizes a comment marker in the first column
fn strip_comment_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let line = line.trim_start();
            !(line.starts_with('#') || line.starts_with(';'))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn section_params(ini: &Ini, section: &str) -> Option<ConnParams> {
    let props = ini.section(Some(section))?;
    let mut params = ConnParams::new();
    if section != DEFAULT_SECTION {
        if let Some(defaults) = ini.section(Some(DEFAULT_SECTION)) {
            for (k, v) in defaults.iter() {
                params.insert(k, v);
            }
        }
    }
    for (k, v) in props.iter() {
        params.insert(k, v);
    }
    Some(params)
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub log_file: Option<String>,
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub output_file: String,
    pub format: ExportFormat,
    pub delimiter: String,
    pub include_header: bool,
    pub buffer_size: usize,
    pub compression: CompressionType,
}

impl ExportConfig {
    pub fn new(output_file: impl Into<String>) -> Self {
        Self {
            output_file: output_file.into(),
            format: ExportFormat::Csv,
            delimiter: default_delimiter(),
            include_header: true,
            buffer_size: default_buffer_size(),
            compression: CompressionType::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Tsv,
    Custom,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tsv" => ExportFormat::Tsv,
            "custom" => ExportFormat::Custom,
            _ => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
}

impl CompressionType {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gzip" => CompressionType::Gzip,
            _ => CompressionType::None,
        }
    }
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_buffer_size() -> usize {
    1024 * 1024 // 1MB
}
