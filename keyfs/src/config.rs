//! Network backend configuration
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! base_url: https://example.com/files/
//! index: index.json
//! remote_write: false
//! transport:
//!   timeout_ms: 5000
//!   headers:
//!     Authorization: Bearer abc
//! ```

use crate::fetch::index::IndexData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INDEX: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Where the path → record index comes from.
    #[serde(default)]
    pub index: IndexSource,

    /// Prefix every file URL is built from. A trailing `/` is stripped.
    pub base_url: String,

    #[serde(default, alias = "transport_options")]
    pub transport: TransportOptions,

    /// Send writes and deletes to the origin. When false they only touch
    /// the local cache.
    #[serde(default)]
    pub remote_write: bool,

    /// Skip fetching every regular file at startup.
    #[serde(default)]
    pub disable_prefetch: bool,
}

/// Index given inline, or the URL of a JSON index document. Relative URLs
/// are resolved against `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexSource {
    Url(String),
    Inline(IndexData),
}

impl Default for IndexSource {
    fn default() -> Self {
        IndexSource::Url(DEFAULT_INDEX.to_string())
    }
}

/// Passed through to the HTTP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportOptions {
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub user_agent: Option<String>,
}

impl TransportOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Config file not found in default locations")]
    ConfigNotFound,
}

impl FetchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            index: IndexSource::default(),
            base_url: base_url.into(),
            transport: TransportOptions::default(),
            remote_write: false,
            disable_prefetch: false,
        }
    }

    pub fn with_index(mut self, index: IndexSource) -> Self {
        self.index = index;
        self
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load the first config found in the usual locations.
    pub fn from_default_path() -> Result<Self, ConfigError> {
        let possible_paths = ["keyfs.yml", "keyfs.yaml", "/etc/keyfs/config.yml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(ConfigError::ConfigNotFound)
    }
}
