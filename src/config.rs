//! Configuration module
//!
//! Handles loading and parsing of server and client configuration from files
//! and environment variables.

use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default reliable (control) port
pub const DEFAULT_CONTROL_PORT: u16 = 4296;

/// Default unreliable (data) port
pub const DEFAULT_DATA_PORT: u16 = 4297;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Reliable channel port (TCP)
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Unreliable channel port (UDP)
    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// Maximum simultaneous clients
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,

    /// Seconds a new connection has to bind its datagram address
    #[serde(default = "default_bind_timeout")]
    pub bind_timeout_secs: u64,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Relay server IP address
    #[serde(default = "default_server_ip")]
    pub server_ip: String,

    /// Reliable channel port (TCP)
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Unreliable channel port (UDP)
    #[serde(default = "default_data_port")]
    pub data_port: u16,

    /// Simulation ticks per second
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,

    /// Distance the local player must move before a Movement is sent
    #[serde(default = "default_position_threshold")]
    pub position_threshold: f32,

    /// Degrees the local player must turn before a Movement is sent
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: f32,

    /// Chat lines kept for display
    #[serde(default = "default_chat_history_lines")]
    pub chat_history_lines: usize,

    /// Planar movement speed in units per second
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,

    /// Turn speed in degrees per second
    #[serde(default = "default_rotate_speed")]
    pub rotate_speed: f32,

    /// Milliseconds to wait for the connection handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}

fn default_max_clients() -> u32 {
    256
}

fn default_bind_timeout() -> u64 {
    10
}

fn default_tick_rate() -> u32 {
    50
}

fn default_position_threshold() -> f32 {
    0.05
}

fn default_rotation_threshold() -> f32 {
    1.0
}

fn default_chat_history_lines() -> usize {
    2
}

fn default_move_speed() -> f32 {
    5.0
}

fn default_rotate_speed() -> f32 {
    150.0
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            data_port: default_data_port(),
            max_clients: default_max_clients(),
            bind_timeout_secs: default_bind_timeout(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/client.toml"),
            server_ip: default_server_ip(),
            control_port: default_control_port(),
            data_port: default_data_port(),
            tick_rate_hz: default_tick_rate(),
            position_threshold: default_position_threshold(),
            rotation_threshold: default_rotation_threshold(),
            chat_history_lines: default_chat_history_lines(),
            move_speed: default_move_speed(),
            rotate_speed: default_rotate_speed(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Read a TOML file into `T`, or fall back to defaults if it is missing
async fn read_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        return Ok(T::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.parse().ok())
}

fn validate_ports(control_port: u16, data_port: u16) -> Result<()> {
    if control_port == 0 || data_port == 0 {
        anyhow::bail!("Control and data ports must be non-zero");
    }
    if control_port == data_port {
        anyhow::bail!("Control port and data port must be different");
    }
    Ok(())
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("RELAYSYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config: Self = read_or_default(&config_path).await?;
        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RELAYSYNC_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Some(port) = env_parse("RELAYSYNC_CONTROL_PORT") {
            self.control_port = port;
        }
        if let Some(port) = env_parse("RELAYSYNC_DATA_PORT") {
            self.data_port = port;
        }
        if let Some(max) = env_parse("RELAYSYNC_MAX_CLIENTS") {
            self.max_clients = max;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.bind_address))?;

        // Port 0 asks the OS for an ephemeral port
        if self.control_port != 0 && self.control_port == self.data_port {
            anyhow::bail!("Control port and data port must be different");
        }

        if self.max_clients == 0 || self.max_clients > u16::MAX as u32 + 1 {
            anyhow::bail!("Max clients must be between 1 and 65536");
        }

        if self.bind_timeout_secs == 0 {
            anyhow::bail!("Bind timeout must be at least one second");
        }

        Ok(())
    }

    /// Configuration for ephemeral loopback ports, used by tests
    pub fn loopback_ephemeral() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            control_port: 0,
            data_port: 0,
            ..Self::default()
        }
    }
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("RELAYSYNC_CLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/client.toml"));

        let mut config: Self = read_or_default(&config_path).await?;
        config.config_path = config_path;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RELAYSYNC_SERVER_IP") {
            self.server_ip = val;
        }
        if let Some(port) = env_parse("RELAYSYNC_CONTROL_PORT") {
            self.control_port = port;
        }
        if let Some(port) = env_parse("RELAYSYNC_DATA_PORT") {
            self.data_port = port;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server_ip()?;
        validate_ports(self.control_port, self.data_port)?;

        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            anyhow::bail!("Tick rate must be between 1 and 1000 Hz");
        }

        for (name, value) in [
            ("position_threshold", self.position_threshold),
            ("rotation_threshold", self.rotation_threshold),
            ("move_speed", self.move_speed),
            ("rotate_speed", self.rotate_speed),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("{} must be a finite, non-negative number", name);
            }
        }

        if self.chat_history_lines == 0 {
            anyhow::bail!("Chat history must keep at least one line");
        }

        Ok(())
    }

    /// Parsed server IP address
    pub fn server_ip(&self) -> Result<IpAddr> {
        self.server_ip
            .parse()
            .with_context(|| format!("Invalid server IP address: {}", self.server_ip))
    }

    /// Seconds per simulation tick
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate_hz as f32
    }
}
