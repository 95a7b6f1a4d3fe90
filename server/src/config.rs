use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::Heartbeat;

/// Effective server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// Path of the TOML file that was merged
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    /// Data directory for persistent state (DB, keys)
    pub data_dir: String,
    /// Only trust identities carried by a signed session token
    pub require_token: bool,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    /// Media URL signing (loaded from [media] section in TOML)
    #[serde(default)]
    pub media: Option<MediaConfig>,
}

/// Chirp real-time presence and delivery server
///
/// Only flags that were actually given are serialized, so unset flags never
/// shadow the TOML file.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "chirp-server", version, about = "Chirp real-time presence and delivery server")]
pub struct Cli {
    /// Port to listen on [default: 5000]
    #[arg(long, env = "CHIRP_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "CHIRP_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./chirp.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHIRP_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "CHIRP_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Only trust identities carried by a signed session token
    #[arg(long, env = "CHIRP_REQUIRE_TOKEN")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub require_token: bool,

    /// Seconds between WebSocket pings [default: 30]
    #[arg(long, env = "CHIRP_PING_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection [default: 10]
    #[arg(long, env = "CHIRP_PONG_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

/// Configuration for time-limited image URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Public base URL of the media CDN, e.g. "https://media.example.com"
    pub base_url: String,

    /// Shared secret used to sign URLs; signing is disabled when empty
    #[serde(default)]
    pub signing_secret: String,

    /// Lifetime of a signed URL in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

fn default_url_ttl() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./chirp.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            require_token: false,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            media: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHIRP_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    /// Merge the layers on top of already parsed CLI flags.
    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHIRP_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chirp Server Configuration
# Place this file at ./chirp.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHIRP_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Ignore the bare ?userId= handshake parameter; only ?token=<session JWT>
# establishes presence
# require_token = false

# WebSocket heartbeat: ping every N seconds, close if no pong within M seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Media URLs (image attachments) ----
# [media]
# base_url = "https://media.example.com"
# signing_secret = ""   # Signing disabled when empty
# url_ttl_secs = 3600   # 1 hour
"#
    .to_string()
}
