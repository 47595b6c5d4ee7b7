//! Configuration shared by the `minion` and `modcall` binaries.
//!
//! ```yaml
//! minion_id: mac01
//! bind: 0.0.0.0:4506
//! timeout_ms: 30000
//! token: s3cret
//! minions:
//!   mac01: http://10.0.0.5:4506
//! keychain:
//!   default_keychain: /Library/Keychains/System.keychain
//! ```
//!
//! Environment variables override the file: `MODCALL_MINION_ID`,
//! `MODCALL_BIND`, `MODCALL_TIMEOUT_MS`, `MODCALL_TOKEN`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::SYSTEM_KEYCHAIN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModcallConfig {
    /// This host's id when serving as a minion.
    #[serde(default = "default_minion_id")]
    pub minion_id: String,

    /// Minion server listen address (default: 0.0.0.0:4506).
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Remote call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Shared secret sent and checked in the `x-modcall-token` header.
    #[serde(default)]
    pub token: Option<String>,

    /// Known minions: id to base URL.
    #[serde(default)]
    pub minions: BTreeMap<String, String>,

    #[serde(default)]
    pub keychain: KeychainConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeychainConfig {
    #[serde(default = "default_keychain")]
    pub default_keychain: String,
}

impl Default for ModcallConfig {
    fn default() -> Self {
        Self {
            minion_id: default_minion_id(),
            bind: default_bind(),
            timeout_ms: default_timeout_ms(),
            token: None,
            minions: BTreeMap::new(),
            keychain: KeychainConfig::default(),
        }
    }
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            default_keychain: default_keychain(),
        }
    }
}

impl ModcallConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty file is an empty mapping, not an error.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load `path` if given, else defaults; then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `MODCALL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("MODCALL_MINION_ID") {
            self.minion_id = id;
        }
        if let Some(bind) = lookup("MODCALL_BIND") {
            self.bind = bind.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    key: "MODCALL_BIND".to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(timeout) = lookup("MODCALL_TIMEOUT_MS") {
            self.timeout_ms = timeout.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: "MODCALL_TIMEOUT_MS".to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(token) = lookup("MODCALL_TOKEN") {
            self.token = Some(token).filter(|t| !t.is_empty());
        }
        Ok(())
    }
}

fn default_minion_id() -> String {
    String::from("local")
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4506))
}

const fn default_timeout_ms() -> u64 {
    crate::dispatch::DEFAULT_TIMEOUT_MS
}

fn default_keychain() -> String {
    String::from(SYSTEM_KEYCHAIN)
}
