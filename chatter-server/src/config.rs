//! Configuration system for the Chatter membership server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatter-server/config.toml`)
//! 4. Compiled defaults

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatcher::{DEFAULT_MAX_BODY_LEN, DEFAULT_MEMBER_TIMEOUT};
use crate::registry::DEFAULT_MAX_MEMBERS;

/// Errors that can occur when loading server configuration.
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

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_host: Option<IpAddr>,
    max_members: Option<usize>,
    max_body_len: Option<usize>,
    member_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the membership server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chatter membership server")]
pub struct ServerCliArgs {
    /// Welcome port clients send their join requests to.
    pub port: u16,

    /// Local address to bind the welcome port on.
    #[arg(long, env = "CHATTER_BIND_HOST")]
    pub bind_host: Option<IpAddr>,

    /// Path to config file (default: `~/.config/chatter-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of joined members.
    #[arg(long)]
    pub max_members: Option<usize>,

    /// Maximum chat body length in bytes.
    #[arg(long)]
    pub max_body_len: Option<usize>,

    /// Seconds a member may stay silent before it is evicted.
    #[arg(long)]
    pub member_timeout_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATTER_SERVER_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address the welcome port is bound on.
    pub bind_host: IpAddr,
    /// Welcome port.
    pub port: u16,
    /// Registry capacity.
    pub max_members: usize,
    /// Maximum chat body length in bytes.
    pub max_body_len: usize,
    /// Silence after which a member is evicted.
    pub member_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9000,
            max_members: DEFAULT_MAX_MEMBERS,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            member_timeout: DEFAULT_MEMBER_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// The socket address to bind the welcome port on.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    /// Priority: CLI > file > default. The port always comes from the CLI.
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_host: cli
                .bind_host
                .or(file.server.bind_host)
                .unwrap_or(defaults.bind_host),
            port: cli.port,
            max_members: cli
                .max_members
                .or(file.server.max_members)
                .unwrap_or(defaults.max_members),
            max_body_len: cli
                .max_body_len
                .or(file.server.max_body_len)
                .unwrap_or(defaults.max_body_len),
            member_timeout: cli
                .member_timeout_secs
                .or(file.server.member_timeout_secs)
                .filter(|secs| *secs > 0)
                .map_or(defaults.member_timeout, Duration::from_secs),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("chatter-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
