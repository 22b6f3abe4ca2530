//! Sync configuration, loaded once at startup.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the replication queue and its remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Master switch; when off every queue operation is a no-op.
    pub enabled: bool,
    /// Secondary node host name or address.
    pub remote_host: String,
    /// Login user on the secondary node.
    pub remote_user: String,
    /// Directory on the secondary node that mirrors `upload_root`.
    pub remote_base_path: String,
    /// Optional ssh identity file.
    pub key_path: Option<PathBuf>,
    /// Local directory that object names are relative to.
    pub upload_root: PathBuf,
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later retry.
    pub retry_base_delay_ms: u64,
    /// Maximum transfers in flight.
    pub max_concurrent: usize,
    /// Finished tasks kept for inspection.
    pub max_history_size: usize,
    /// Per-attempt bound (rsync `--timeout` and wall clock).
    pub transfer_timeout_secs: u64,
    /// ssh `ConnectTimeout`.
    pub connect_timeout_secs: u64,
    /// Admin API listen address.
    pub bind_addr: SocketAddr,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_host: String::new(),
            remote_user: String::new(),
            remote_base_path: String::new(),
            key_path: None,
            upload_root: PathBuf::from("./uploads"),
            max_retries: 3,
            retry_base_delay_ms: 5000,
            max_concurrent: 3,
            max_history_size: 1000,
            transfer_timeout_secs: 300,
            connect_timeout_secs: 30,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3334)),
        }
    }
}

impl SyncConfig {
    /// Load a config from a `.toml` or `.json` file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => Err(SyncError::Config {
                msg: format!("unsupported config file extension: {:?}", ext),
            }),
        }
    }

    /// Reject a half-configured feature. Disabled configs always pass.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("remote_host", &self.remote_host),
            ("remote_user", &self.remote_user),
            ("remote_base_path", &self.remote_base_path),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();

        if !missing.is_empty() {
            return Err(SyncError::Config {
                msg: format!(
                    "file sync is enabled but configuration is incomplete, missing: {}",
                    missing.join(", ")
                ),
            });
        }
        if self.max_concurrent == 0 {
            return Err(SyncError::Config {
                msg: "max_concurrent must be at least 1".to_string(),
            });
        }
        if self.max_history_size == 0 {
            return Err(SyncError::Config {
                msg: "max_history_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Base delay for exponential backoff.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// `user@host:path` of the remote endpoint, for logs.
    pub fn remote_target(&self) -> String {
        format!(
            "{}@{}:{}",
            self.remote_user, self.remote_host, self.remote_base_path
        )
    }
}
