//! Store configuration.
//!
//! Every field has a default; a TOML file only needs the values it changes.

use crate::headers::Headers;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Metadata keys copied from a collection payload onto the collection.
pub const DEFAULT_META_KEYS: &[&str] = &[
    "actionLinks",
    "createDefaults",
    "createTypes",
    "filters",
    "links",
    "pagination",
    "resourceType",
    "sort",
    "sortLinks",
    "type",
];

/// Types that never trigger missing-reference notifications.
pub const DEFAULT_NEVER_MISSING: &[&str] = &["error"];

const CONFIG_ENV: &str = "QUIVER_STORE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix for relative request URLs.
    pub base_url: String,
    /// Absolute origin of the API; absolute URLs under it can be made root-relative.
    pub origin: Option<String>,
    pub default_timeout_ms: u64,
    pub default_page_size: u32,
    pub meta_keys: Vec<String>,
    pub never_missing: Vec<String>,
    /// Field name that replaces the wire key `actions` on records.
    pub replace_actions: Option<String>,
    /// Namespace of this store's entry in a transferred state box.
    pub state_namespace: String,
    /// Headers sent with every request.
    pub headers: Headers,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "/v1".to_string(),
            origin: None,
            default_timeout_ms: 30_000,
            default_page_size: 1000,
            meta_keys: DEFAULT_META_KEYS.iter().map(|k| k.to_string()).collect(),
            never_missing: DEFAULT_NEVER_MISSING
                .iter()
                .map(|k| k.to_string())
                .collect(),
            replace_actions: Some("actionLinks".to_string()),
            state_namespace: "quiver-store".to_string(),
            headers: Headers::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl StoreConfig {
    /// Load from `--config <path>` or `QUIVER_STORE_CONFIG`; defaults when neither is set.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.state_namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "state_namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(origin) = &self.origin {
            if !origin.starts_with("http://") && !origin.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    field: "origin",
                    reason: "must start with http:// or https://".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_state_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.state_namespace = namespace.into();
        self
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
