//! Configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::client::ConnectOptions;
use crate::server::{
    ServerOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_LISTEN_BACKLOG, DEFAULT_MAX_COMMAND_BYTES,
    DEFAULT_THREADS,
};
use crate::transport::path;
use crate::{IpcError, Result};

/// Upper bound on the worker pool; anything larger is a typo.
const MAX_THREADS: usize = 1024;

fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("sockline.sock")
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_max_command_bytes() -> usize {
    DEFAULT_MAX_COMMAND_BYTES
}

fn default_listen_backlog() -> u32 {
    DEFAULT_LISTEN_BACKLOG
}

fn default_command_timeout_ms() -> u64 {
    u64::try_from(DEFAULT_COMMAND_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

/// Client connect policy as written in the `[client]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClientConfig {
    /// Retry while the server is busy or not yet accepting.
    #[serde(default)]
    pub wait_if_busy: bool,
    /// Retry while the socket path does not exist.
    #[serde(default)]
    pub wait_if_not_found: bool,
    /// Never change directory to reach a long socket path.
    #[serde(default)]
    pub uds_disallow_chdir: bool,
    /// Retry deadline in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wait_if_busy: false,
            wait_if_not_found: false,
            uds_disallow_chdir: false,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Settings shared by the daemon and the ctl client, parsed from TOML.
///
/// ```toml
/// path = "/run/user/1000/sockline.sock"
/// threads = 8
/// listen_backlog = 64
/// command_timeout_ms = 5000
///
/// [client]
/// wait_if_busy = true
/// connect_timeout_ms = 2500
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct IpcConfig {
    /// Socket path the server binds and clients connect to.
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
    /// Worker pool size.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Largest accepted command, in bytes.
    #[serde(default = "default_max_command_bytes")]
    pub max_command_bytes: usize,
    /// Pending connections queued while every worker is busy.
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    /// Time an accepted client gets to send its command, in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Client connect policy.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
            threads: default_threads(),
            max_command_bytes: default_max_command_bytes(),
            listen_backlog: default_listen_backlog(),
            command_timeout_ms: default_command_timeout_ms(),
            client: ClientConfig::default(),
        }
    }
}

impl IpcConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| IpcError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and the socket path.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(IpcError::Config("threads must be greater than zero".into()));
        }
        if self.threads > MAX_THREADS {
            return Err(IpcError::Config(format!(
                "threads must not exceed {MAX_THREADS}"
            )));
        }
        if self.max_command_bytes == 0 {
            return Err(IpcError::Config(
                "max_command_bytes must be greater than zero".into(),
            ));
        }
        if self.listen_backlog == 0 {
            return Err(IpcError::Config(
                "listen_backlog must be greater than zero".into(),
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(IpcError::Config(
                "command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(IpcError::Config(
                "client.connect_timeout_ms must be greater than zero".into(),
            ));
        }
        path::validate(&self.path).map_err(|err| IpcError::Config(format!("path: {err}")))
    }

    /// Server tuning derived from this configuration.
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            threads: self.threads,
            max_command_bytes: self.max_command_bytes,
            listen_backlog: self.listen_backlog,
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }

    /// Client connect policy derived from this configuration.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            wait_if_busy: self.client.wait_if_busy,
            wait_if_not_found: self.client.wait_if_not_found,
            uds_disallow_chdir: self.client.uds_disallow_chdir,
            timeout: Duration::from_millis(self.client.connect_timeout_ms),
        }
    }
}
