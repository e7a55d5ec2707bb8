//! Host key/value configuration
//!
//! The host server hands its configuration to subsystems as a flat
//! key/value view with dotted key paths (`DAP.FunctionResponseCache.path`).
//! This module loads a TOML file into a JSON value tree and resolves
//! dotted lookups against it; a missing key simply yields `None` and the
//! caller falls back to its built-in default.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

/// Config result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors from loading the host configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// A loaded key/value configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    root: Value,
}

impl KeyStore {
    /// Load a TOML configuration file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let value: toml::Value = toml::from_str(contents)?;
        Ok(Self {
            root: toml_to_json(value),
        })
    }

    /// Look up a dotted key path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in key.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a string value; numbers render as their decimal text.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Look up an unsigned integer, accepting decimal strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Convert a TOML value tree to JSON for uniform lookup.
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
