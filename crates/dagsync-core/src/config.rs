//! Configuration system for dagsync.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DAGSYNC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/dagsync/config.toml
//!   3. ~/.config/dagsync/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{Priority, DEFAULT_PRIORITY, MAX_BLOCK_BATCH_BYTES};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DagsyncConfig {
    pub engine: EngineConfig,
    pub sender: SenderConfig,
    pub workload: WorkloadConfig,
}

/// Outgoing request execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Priority stamped on every new request.
    pub default_priority: Priority,
    /// Progress records buffered per request before traversal waits on the caller.
    pub progress_buffer: usize,
}

/// Outgoing response batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Cap on summed block payload bytes per response message.
    pub max_block_batch_bytes: u64,
}

/// Loopback workload run by dagsyncd.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Concurrent requests for the same chain.
    pub requests: usize,
    /// Nodes in the generated chain.
    pub chain_length: usize,
    /// Payload bytes per node.
    pub block_size: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            progress_buffer: 64,
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_block_batch_bytes: MAX_BLOCK_BATCH_BYTES,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            requests: 2,
            chain_length: 100,
            block_size: 4096,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("dagsync")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DagsyncConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::parse(path, &text)?
        } else {
            DagsyncConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse(path: &std::path::Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DAGSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&DagsyncConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply DAGSYNC_* overrides read through `lookup`. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = lookup("DAGSYNC_ENGINE__DEFAULT_PRIORITY").and_then(|v| v.parse().ok()) {
            self.engine.default_priority = p;
        }
        if let Some(n) = lookup("DAGSYNC_ENGINE__PROGRESS_BUFFER").and_then(|v| v.parse().ok()) {
            self.engine.progress_buffer = n;
        }
        if let Some(n) = lookup("DAGSYNC_SENDER__MAX_BLOCK_BATCH_BYTES").and_then(|v| v.parse().ok())
        {
            self.sender.max_block_batch_bytes = n;
        }
        if let Some(n) = lookup("DAGSYNC_WORKLOAD__REQUESTS").and_then(|v| v.parse().ok()) {
            self.workload.requests = n;
        }
        if let Some(n) = lookup("DAGSYNC_WORKLOAD__CHAIN_LENGTH").and_then(|v| v.parse().ok()) {
            self.workload.chain_length = n;
        }
        if let Some(n) = lookup("DAGSYNC_WORKLOAD__BLOCK_SIZE").and_then(|v| v.parse().ok()) {
            self.workload.block_size = n;
        }
    }
}
