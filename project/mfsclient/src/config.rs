//! Client configuration
//!
//! Options can be built in code (builder-style setters) or loaded from a YAML
//! file such as:
//!
//! ```yaml
//! master_addr: "mfsmaster:9421"
//! subdir: "/"
//! master_conns: 4
//! cache_enabled: true
//! io_timeout_ms: 30000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MASTER_PORT: u16 = 9421;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientOptions {
    /// `host[:port]` of the master; port defaults to 9421.
    pub master_addr: String,

    /// Subtree of the namespace exported to this session.
    #[serde(default = "default_subdir")]
    pub subdir: String,

    /// Number of independent master sessions used round-robin.
    #[serde(default = "default_master_conns")]
    pub master_conns: usize,

    /// Cache (parent, name) -> attribute lookups until explicitly purged.
    #[serde(default)]
    pub cache_enabled: bool,

    #[serde(default = "default_read_ahead")]
    pub read_ahead: usize,

    /// Pending writes are flushed once the buffer grows past this many bytes.
    #[serde(default = "default_write_flush_threshold")]
    pub write_flush_threshold: usize,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Deadline for each socket read/write. `None` waits forever.
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,
}

fn default_subdir() -> String {
    "/".to_string()
}

fn default_master_conns() -> usize {
    4
}

fn default_read_ahead() -> usize {
    4 << 20
}

fn default_write_flush_threshold() -> usize {
    1 << 20
}

fn default_keepalive_interval_ms() -> u64 {
    2000
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            master_addr: format!("127.0.0.1:{DEFAULT_MASTER_PORT}"),
            subdir: default_subdir(),
            master_conns: default_master_conns(),
            cache_enabled: false,
            read_ahead: default_read_ahead(),
            write_flush_threshold: default_write_flush_threshold(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            io_timeout_ms: None,
            uid: 0,
            gid: 0,
        }
    }
}

impl ClientOptions {
    pub fn new(master_addr: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;
        let opts: ClientOptions =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn subdir(self, subdir: impl Into<String>) -> Self {
        Self {
            subdir: subdir.into(),
            ..self
        }
    }

    pub fn master_conns(self, master_conns: usize) -> Self {
        Self {
            master_conns,
            ..self
        }
    }

    pub fn cache_enabled(self, cache_enabled: bool) -> Self {
        Self {
            cache_enabled,
            ..self
        }
    }

    pub fn read_ahead(self, read_ahead: usize) -> Self {
        Self { read_ahead, ..self }
    }

    pub fn write_flush_threshold(self, write_flush_threshold: usize) -> Self {
        Self {
            write_flush_threshold,
            ..self
        }
    }

    pub fn keepalive_interval(self, interval: Duration) -> Self {
        Self {
            keepalive_interval_ms: interval.as_millis() as u64,
            ..self
        }
    }

    pub fn io_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            io_timeout_ms: timeout.map(|t| t.as_millis() as u64),
            ..self
        }
    }

    pub fn credentials(self, uid: u32, gid: u32) -> Self {
        Self { uid, gid, ..self }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("master_addr is empty".into()));
        }
        if self.master_conns == 0 {
            return Err(ConfigError::Invalid("master_conns must be positive".into()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_ms must be positive".into(),
            ));
        }
        if !self.subdir.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "subdir must be absolute: {}",
                self.subdir
            )));
        }
        Ok(())
    }

    /// Master address with the default port filled in.
    pub fn master_endpoint(&self) -> String {
        let addr = self.master_addr.trim();
        let has_port = match addr.rsplit_once(':') {
            // bracketed IPv6 literal without port: "[::1]"
            Some((host, port)) => !port.is_empty() && !port.contains(']') && !host.is_empty(),
            None => false,
        };
        if has_port {
            addr.to_string()
        } else {
            format!("{addr}:{DEFAULT_MASTER_PORT}")
        }
    }

    pub fn keepalive_interval_duration(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn io_timeout_duration(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
