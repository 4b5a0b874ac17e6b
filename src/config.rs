//! Configuration loading and persistence.
//!
//! Settings live in `config.json` under the platform config directory
//! (`relaychat/`), with environment variable overrides on top. A missing
//! file means defaults.

use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_PORT, MAX_LINE_BYTES, MAX_QUEUED_LINES, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY,
    SHUTDOWN_GRACE,
};

/// Name of the config file inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// Server-side settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind, e.g. `0.0.0.0` or `127.0.0.1`.
    pub bind_address: String,
    /// TCP port. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Pause between the shutdown notice and closing connections.
    pub shutdown_grace_ms: u64,
    /// Longest unterminated line buffered per connection. `0` disables the cap.
    pub max_line_bytes: usize,
    /// Outbound lines queued per client before it is dropped as stalled.
    pub max_queued_lines: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            shutdown_grace_ms: duration_ms(SHUTDOWN_GRACE),
            max_line_bytes: MAX_LINE_BYTES,
            max_queued_lines: MAX_QUEUED_LINES,
        }
    }
}

impl ServerConfig {
    /// Defaults with the given port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// `bind_address:port` as a string suitable for `bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Client-side settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Delay before each automatic reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            reconnect_delay_ms: duration_ms(RECONNECT_DELAY),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Delay before each automatic reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Configuration for relaychat.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Client settings.
    pub client: ClientConfig,
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `RELAYCHAT_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("RELAYCHAT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("relaychat")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Saves configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        self.save_to(&path)
    }

    /// Save to an explicit path as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var("RELAYCHAT_BIND") {
            self.server.bind_address = bind;
        }

        if let Ok(port) = std::env::var("RELAYCHAT_PORT") {
            let port = parse_port(&port)?;
            self.server.port = port;
            self.client.port = port;
        }

        if let Ok(host) = std::env::var("RELAYCHAT_HOST") {
            self.client.host = host;
        }

        if let Ok(delay) = std::env::var("RELAYCHAT_RECONNECT_DELAY_MS") {
            self.client.reconnect_delay_ms = delay
                .trim()
                .parse()
                .with_context(|| format!("Invalid RELAYCHAT_RECONNECT_DELAY_MS: {delay}"))?;
        }

        if let Ok(attempts) = std::env::var("RELAYCHAT_MAX_RECONNECT_ATTEMPTS") {
            self.client.max_reconnect_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("Invalid RELAYCHAT_MAX_RECONNECT_ATTEMPTS: {attempts}"))?;
        }

        Ok(())
    }
}

/// Parse a user-supplied port number.
///
/// # Errors
///
/// Fails with `"Invalid port number"` for non-numeric, zero, or
/// out-of-range input.
pub fn parse_port(input: &str) -> Result<u16> {
    match input.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => bail!("Invalid port number"),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
