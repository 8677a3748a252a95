//! Connector options loader.
//!
//! Options can come from a YAML file, from a flat string map (the shape
//! callers pass when constructing a connector programmatically), or from
//! `DUCK_CREEK_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::offset::OffsetPolicy;

const KNOWN_OPTIONS: [&str; 4] = [
    "file_path",
    "file_pattern",
    "max_concurrent_files",
    "offset_policy",
];

const ENV_FILE_PATH: &str = "DUCK_CREEK_FILE_PATH";
const ENV_FILE_PATTERN: &str = "DUCK_CREEK_FILE_PATTERN";
const ENV_MAX_CONCURRENT_FILES: &str = "DUCK_CREEK_MAX_CONCURRENT_FILES";
const ENV_OFFSET_POLICY: &str = "DUCK_CREEK_OFFSET_POLICY";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, source: std::io::Error },
    Yaml(serde_yaml::Error),
    MissingOption(&'static str),
    InvalidOption {
        key: String,
        value: String,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file {}: {}", path, source)
            }
            ConfigError::Yaml(e) => write!(f, "Failed to parse YAML: {}", e),
            ConfigError::MissingOption(key) => write!(f, "Missing required option '{}'", key),
            ConfigError::InvalidOption {
                key,
                value,
                message,
            } => write!(f, "Invalid value '{}' for option '{}': {}", value, key, message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Yaml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

fn default_file_pattern() -> String {
    "*.xml".to_string()
}

/// Connection-level options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOptions {
    /// Directory holding the exported XML documents
    pub file_path: String,

    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Files read and extracted at once; defaults to available parallelism
    #[serde(default)]
    pub max_concurrent_files: Option<usize>,

    #[serde(default)]
    pub offset_policy: OffsetPolicy,
}

impl ConnectorOptions {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_pattern: default_file_pattern(),
            max_concurrent_files: None,
            offset_policy: OffsetPolicy::default(),
        }
    }

    /// Load options from a YAML file.
    ///
    /// # Arguments
    /// * `path` - Path to the options file
    ///
    /// # Errors
    /// Returns error if the file can't be read, isn't valid YAML, or lacks
    /// `file_path`
    ///
    /// # Example
    /// ```ignore
    /// use duckcreek::ConnectorOptions;
    ///
    /// let options = ConnectorOptions::load_from_file("config/duck_creek.yaml")?;
    /// println!("Reading {}/{}", options.file_path, options.file_pattern);
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse options from YAML text.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(contents)?;

        if let serde_yaml::Value::Mapping(map) = &yaml {
            for key in map.keys().filter_map(|k| k.as_str()) {
                if !KNOWN_OPTIONS.contains(&key) {
                    warn!(option = key, "Ignoring unknown connector option");
                }
            }
        }

        if yaml.get("file_path").is_none() {
            return Err(ConfigError::MissingOption("file_path"));
        }

        let options: ConnectorOptions = serde_yaml::from_value(yaml)?;
        options.validate()
    }

    /// Build options from a flat string map.
    ///
    /// Unknown keys are logged and ignored.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for key in map.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                warn!(option = %key, "Ignoring unknown connector option");
            }
        }

        let file_path = map
            .get("file_path")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingOption("file_path"))?;

        let mut options = Self::new(file_path.trim());
        if let Some(pattern) = map.get("file_pattern") {
            options.file_pattern = pattern.clone();
        }
        if let Some(value) = map.get("max_concurrent_files") {
            options.max_concurrent_files = Some(parse_concurrency("max_concurrent_files", value)?);
        }
        if let Some(value) = map.get("offset_policy") {
            options.offset_policy = parse_policy("offset_policy", value)?;
        }

        options.validate()
    }

    /// Build options from `DUCK_CREEK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file_path =
            std::env::var(ENV_FILE_PATH).map_err(|_| ConfigError::MissingOption("file_path"))?;

        let mut options = Self::new(file_path);
        if let Ok(pattern) = std::env::var(ENV_FILE_PATTERN) {
            options.file_pattern = pattern;
        }
        if let Ok(value) = std::env::var(ENV_MAX_CONCURRENT_FILES) {
            options.max_concurrent_files = Some(parse_concurrency(ENV_MAX_CONCURRENT_FILES, &value)?);
        }
        if let Ok(value) = std::env::var(ENV_OFFSET_POLICY) {
            options.offset_policy = parse_policy(ENV_OFFSET_POLICY, &value)?;
        }

        options.validate()
    }

    /// Effective number of files in flight.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_files.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.file_path.trim().is_empty() {
            return Err(ConfigError::MissingOption("file_path"));
        }
        if self.file_pattern.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                key: "file_pattern".to_string(),
                value: self.file_pattern,
                message: "pattern must not be empty".to_string(),
            });
        }
        if self.max_concurrent_files == Some(0) {
            return Err(ConfigError::InvalidOption {
                key: "max_concurrent_files".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

fn parse_concurrency(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

fn parse_policy(key: &str, value: &str) -> Result<OffsetPolicy, ConfigError> {
    value.parse().map_err(|message| ConfigError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
        message,
    })
}

/// Per-table read options.
///
/// No keys are recognized yet; anything passed is logged and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableOptions {
    entries: HashMap<String, String>,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log every entry as ignored for `table`.
    pub fn warn_unrecognized(&self, table: &str) {
        for key in self.entries.keys() {
            warn!(table, option = %key, "Ignoring unrecognized table option");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_with_defaults() {
        let options = ConnectorOptions::from_yaml_str("file_path: /data/exports\n").unwrap();

        assert_eq!(options.file_path, "/data/exports");
        assert_eq!(options.file_pattern, "*.xml");
        assert_eq!(options.max_concurrent_files, None);
        assert_eq!(options.offset_policy, OffsetPolicy::RetryFailed);
        assert!(options.concurrency() >= 1);
    }

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
file_path: /data/exports
file_pattern: "policy_*.xml"
max_concurrent_files: 2
offset_policy: skip_failed
unknown_key: ignored
"#;
        let options = ConnectorOptions::from_yaml_str(yaml).unwrap();

        assert_eq!(options.file_pattern, "policy_*.xml");
        assert_eq!(options.concurrency(), 2);
        assert_eq!(options.offset_policy, OffsetPolicy::SkipFailed);
    }

    #[test]
    fn test_from_yaml_missing_file_path() {
        let err = ConnectorOptions::from_yaml_str("file_pattern: \"*.xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingOption("file_path")));
    }

    #[test]
    fn test_from_yaml_invalid() {
        let err = ConnectorOptions::from_yaml_str("file_path: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("file_path".to_string(), "/data".to_string());
        map.insert("max_concurrent_files".to_string(), "3".to_string());

        let options = ConnectorOptions::from_map(&map).unwrap();
        assert_eq!(options.file_path, "/data");
        assert_eq!(options.max_concurrent_files, Some(3));
    }

    #[test]
    fn test_from_map_rejects_zero_concurrency() {
        let mut map = HashMap::new();
        map.insert("file_path".to_string(), "/data".to_string());
        map.insert("max_concurrent_files".to_string(), "0".to_string());

        let err = ConnectorOptions::from_map(&map).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_files"));
    }

    #[test]
    fn test_from_map_bad_number() {
        let mut map = HashMap::new();
        map.insert("file_path".to_string(), "/data".to_string());
        map.insert("max_concurrent_files".to_string(), "many".to_string());

        assert!(matches!(
            ConnectorOptions::from_map(&map),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_from_map_missing_path() {
        let map = HashMap::new();
        assert!(matches!(
            ConnectorOptions::from_map(&map),
            Err(ConfigError::MissingOption("file_path"))
        ));
    }

    #[test]
    fn test_table_options() {
        let mut entries = HashMap::new();
        entries.insert("batch_size".to_string(), "10".to_string());

        let options = TableOptions::from_map(entries);
        assert!(!options.is_empty());
        options.warn_unrecognized("policies");
        assert!(TableOptions::new().is_empty());
    }
}
