//! Configuration module for provd
//!
//! This module handles two kinds of configuration:
//! - The daemon configuration ([`KernelConfig`], TOML): host identity, ports,
//!   dispatch cadence, timeouts and the peer directory.
//! - The pipeline configuration ([`PipelineConfig`], plain text): the
//!   reporters, storages, filters, transformers and sketches to recreate on
//!   startup, one directive per line.
//!
//! # Data Location
//!
//! Files without an explicit path are kept in the platform data directory
//! under `provd`:
//!
//! - **Linux**: `~/.local/share/provd/`
//! - **macOS**: `~/Library/Application Support/provd/`
//! - **Windows**: `%APPDATA%\provd\`
//!
//! # Example
//!
//! ```toml
//! host_id = "alpha"
//! query_port = 9999
//! sketch_port = 9998
//!
//! [peers.beta]
//! query = "10.0.0.2:9999"
//! sketch = "10.0.0.2:9998"
//! ```

pub mod pipeline;

pub use pipeline::{Directive, PipelineConfig};

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "provd";

/// Default daemon configuration filename
pub const CONFIG_FILE: &str = "provd.toml";

/// Default pipeline configuration filename
pub const PIPELINE_FILE: &str = "pipeline.conf";

/// Default port of the remote query service
pub const DEFAULT_QUERY_PORT: u16 = 9999;

/// Default port of the remote sketch service
pub const DEFAULT_SKETCH_PORT: u16 = 9998;

/// Maximum elements drained from one buffer per tick
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Delay between dispatch ticks in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 3;

/// Default timeout for socket operations in milliseconds
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

/// Default bound on waiting for a transaction flush in milliseconds
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 30_000;

/// Maximum path length used by sketch path checks
pub const DEFAULT_PATH_MAX_LENGTH: u32 = 100;

// ==================== Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        KernelError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            KernelError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Peer Directory ====================

/// Addresses of one peer host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub query: Option<String>,
    pub sketch: Option<String>,
}

// ==================== Kernel Config ====================

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Identifier other hosts use for this host in `remote host` annotations
    pub host_id: String,

    /// Address the remote listeners bind to
    pub listen_address: String,

    pub query_port: u16,
    pub sketch_port: u16,

    /// Maximum elements drained from one buffer per tick
    pub batch_size: usize,

    /// Delay between dispatch ticks
    pub tick_interval_ms: u64,

    /// Bound on a query's wait for the flush barrier
    pub flush_timeout_ms: u64,

    /// Connect, read and write timeout for every remote call
    pub remote_timeout_ms: u64,

    /// Hop limit for sketch propagation
    pub sketch_max_level: u32,

    /// Maximum path length for sketch path checks
    pub path_max_length: u32,

    /// Resolve network vertices of local lineage queries on their hosts
    pub resolve_remote_lineage: bool,

    /// Where `shutdown` saves the pipeline and startup reloads it
    pub pipeline_config: Option<PathBuf>,

    /// File or FIFO read by the query pipe loop
    pub query_pipe: Option<PathBuf>,

    /// Directory for rolling log files
    pub log_dir: Option<PathBuf>,

    /// Host id to address overrides
    pub peers: HashMap<String, PeerAddress>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            host_id: "localhost".to_string(),
            listen_address: "0.0.0.0".to_string(),
            query_port: DEFAULT_QUERY_PORT,
            sketch_port: DEFAULT_SKETCH_PORT,
            batch_size: DEFAULT_BATCH_SIZE,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            sketch_max_level: 2,
            path_max_length: DEFAULT_PATH_MAX_LENGTH,
            resolve_remote_lineage: true,
            pipeline_config: None,
            query_pipe: None,
            log_dir: None,
            peers: HashMap::new(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KernelError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            KernelError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the dispatch loop or every remote call.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("batch_size", self.batch_size == 0),
            ("flush_timeout_ms", self.flush_timeout_ms == 0),
            ("remote_timeout_ms", self.remote_timeout_ms == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(KernelError::Config(format!("{} must be at least 1", name))),
            None => Ok(()),
        }
    }

    /// Load from `path`, or from the data directory, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => app_data_dir().map(|d| d.join(CONFIG_FILE)),
        };

        match path {
            Some(p) if p.exists() => Self::load(&p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config, using defaults: {}", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KernelError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| KernelError::Config(format!("Failed to write config: {}", e)))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Pipeline config path, defaulting to the data directory
    pub fn pipeline_config_path(&self) -> Option<PathBuf> {
        self.pipeline_config
            .clone()
            .or_else(|| app_data_dir().map(|d| d.join(PIPELINE_FILE)))
    }

    /// Query service address of `host`.
    pub fn query_address(&self, host: &str) -> String {
        let configured = self.peers.get(host).and_then(|p| p.query.clone());
        configured.unwrap_or_else(|| with_default_port(host, self.query_port))
    }

    /// Sketch service address of `host`.
    pub fn sketch_address(&self, host: &str) -> String {
        let configured = self.peers.get(host).and_then(|p| p.sketch.clone());
        configured.unwrap_or_else(|| with_default_port(host, self.sketch_port))
    }

    /// Whether `host` names this host.
    pub fn is_local_host(&self, host: &str) -> bool {
        host == self.host_id || host == "localhost"
    }
}

fn with_default_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.query_port, 9999);
        assert_eq!(config.sketch_port, 9998);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.tick_interval(), Duration::from_millis(3));
        assert!(config.resolve_remote_lineage);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: KernelConfig = toml::from_str(
            r#"
            host_id = "alpha"
            batch_size = 10

            [peers.beta]
            query = "127.0.0.1:4000"
            "#,
        )
        .unwrap();
        assert_eq!(config.host_id, "alpha");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sketch_port, DEFAULT_SKETCH_PORT);
        assert_eq!(config.query_address("beta"), "127.0.0.1:4000");
        assert_eq!(config.sketch_address("beta"), "beta:9998");
        assert_eq!(config.query_address("gamma:7000"), "gamma:7000");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = KernelConfig::default();
        config.host_id = "saved".into();
        config.peers.insert(
            "other".into(),
            PeerAddress {
                query: Some("127.0.0.1:1".into()),
                sketch: None,
            },
        );
        config.save(&path).unwrap();
        assert_eq!(KernelConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "batch_size = \"many\"").unwrap();
        assert_eq!(KernelConfig::load_or_default(Some(&path)), KernelConfig::default());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "batch_size = 0").unwrap();

        let err = KernelConfig::load(&path).unwrap_err();
        assert!(matches!(err, KernelError::Config(ref m) if m.contains("batch_size")));
        assert_eq!(KernelConfig::load_or_default(Some(&path)), KernelConfig::default());
    }

    #[test]
    fn test_zero_remote_timeout_rejected() {
        let config = KernelConfig {
            remote_timeout_ms: 0,
            ..KernelConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(KernelConfig::default().validate().is_ok());
    }
}
