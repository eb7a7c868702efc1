use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coded backend server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "coded-server", version, about = "Coded backend server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CODED_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CODED_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./coded.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CODED_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "CODED_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// HS256 secret shared with the auth service. Generated into data_dir when unset.
    #[arg(long, env = "CODED_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Real-time channel tuning (loaded from [ws] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub ws: Option<WsConfig>,
}

/// Limits and timers for WebSocket connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Frames buffered per connection before it is disconnected as too slow (default: 256)
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Interval between server heartbeat pings in milliseconds (default: 30000)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Deadline for a single frame write in milliseconds (default: 10000)
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Idle time allowed between inbound frames in milliseconds (default: 60000)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Largest inbound message accepted, in bytes (default: 512)
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl WsConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            heartbeat_interval_ms: 30_000,
            write_timeout_ms: 10_000,
            read_timeout_ms: 60_000,
            max_frame_bytes: 512,
        }
    }
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    60_000
}

fn default_max_frame_bytes() -> usize {
    512
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./coded.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            ws: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CODED_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CODED_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// WebSocket settings, falling back to defaults when [ws] is absent.
    pub fn ws(&self) -> WsConfig {
        self.ws.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Coded Server Configuration
# Place this file at ./coded.toml or specify with --config <path>
# All settings can be overridden via environment variables (CODED_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# HS256 secret shared with the auth service (default: generated into data_dir)
# jwt_secret = ""

# ---- Real-time channel ----
# [ws]

# Frames buffered per client; a client that falls this far behind is disconnected
# mailbox_capacity = 256

# Server heartbeat ping interval (ms)
# heartbeat_interval_ms = 30000

# Per-frame write deadline (ms); exceeding it drops the connection
# write_timeout_ms = 10000

# Idle read deadline (ms), refreshed by every inbound frame and pong
# read_timeout_ms = 60000

# Largest inbound client message (bytes)
# max_frame_bytes = 512
"#
    .to_string()
}
