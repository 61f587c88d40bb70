//! Configuration system for the Chatter client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatter/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{
    DEFAULT_EVENT_BUFFER, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_JOIN_TIMEOUT, DEFAULT_LEAVE_TIMEOUT,
    SessionConfig,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    bind_host: Option<IpAddr>,
    join_timeout_ms: Option<u64>,
    leave_timeout_ms: Option<u64>,
    event_buffer: Option<usize>,
    heartbeat_interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Screen name to join under.
    pub screen_name: String,
    /// Membership server host.
    pub server_host: String,
    /// Membership server welcome port.
    pub server_port: u16,
    /// Local address the client socket is bound on (ephemeral port).
    pub bind_host: IpAddr,
    /// Bound on the join handshake.
    pub join_timeout: Duration,
    /// Bound on the leave handshake.
    pub leave_timeout: Duration,
    /// Session event channel capacity.
    pub event_buffer: usize,
    /// Spacing of liveness heartbeats while joined (zero disables).
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            screen_name: String::new(),
            server_host: "127.0.0.1".to_string(),
            server_port: 9000,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default. Screen name and server address
    /// always come from the command line.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            screen_name: cli.screen_name.clone(),
            server_host: cli.server_host.clone(),
            server_port: cli.server_port,
            bind_host: cli
                .bind_host
                .or(file.session.bind_host)
                .unwrap_or(defaults.bind_host),
            join_timeout: cli
                .join_timeout_ms
                .or(file.session.join_timeout_ms)
                .map_or(defaults.join_timeout, Duration::from_millis),
            leave_timeout: cli
                .leave_timeout_ms
                .or(file.session.leave_timeout_ms)
                .map_or(defaults.leave_timeout, Duration::from_millis),
            event_buffer: file
                .session
                .event_buffer
                .unwrap_or(defaults.event_buffer),
            heartbeat_interval: cli
                .heartbeat_interval_ms
                .or(file.session.heartbeat_interval_ms)
                .map_or(defaults.heartbeat_interval, Duration::from_millis),
        }
    }

    /// Local bind address for the client socket; the port is ephemeral.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, 0)
    }

    /// Session timing and buffering derived from this configuration.
    #[must_use]
    pub const fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            join_timeout: self.join_timeout,
            leave_timeout: self.leave_timeout,
            event_buffer: self.event_buffer,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chatter terminal chat client")]
pub struct CliArgs {
    /// Screen name to join under (no whitespace).
    pub screen_name: String,

    /// Host name or address of the membership server.
    pub server_host: String,

    /// Welcome port of the membership server.
    pub server_port: u16,

    /// Local address to bind the client socket on.
    #[arg(long, env = "CHATTER_CLIENT_BIND_HOST")]
    pub bind_host: Option<IpAddr>,

    /// Path to config file (default: `~/.config/chatter/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How long to wait for the server to answer a join, in milliseconds.
    #[arg(long)]
    pub join_timeout_ms: Option<u64>,

    /// How long to wait for a leave acknowledgment, in milliseconds.
    #[arg(long)]
    pub leave_timeout_ms: Option<u64>,

    /// Spacing of liveness heartbeats while joined, in milliseconds
    /// (0 disables them).
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATTER_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/chatter.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("chatter").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
