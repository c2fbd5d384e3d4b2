//! Server configuration.
//!
//! Loaded from a YAML file named by `COSERVE_CONFIG`, falling back to
//! defaults. The `LISTEN` environment variable (`host:port`) overrides the
//! bind address from either source.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
}

/// Listener, worker pool and per-connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address or host name to bind.
    pub address: String,
    pub port: u16,
    /// Number of runtime worker threads.
    pub workers: usize,
    /// Read timeout in seconds, `0` disables it.
    pub read_timeout: u64,
    /// Write timeout in seconds, `0` disables it.
    pub write_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            read_timeout: 0,
            write_timeout: 0,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

impl Config {
    /// Loads the configuration file named by `COSERVE_CONFIG`, or defaults,
    /// then applies the `LISTEN` override.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("COSERVE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.apply_listen(&listen)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overrides address and port from a `host:port` string.
    pub fn apply_listen(&mut self, listen: &str) -> Result<()> {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("LISTEN must be host:port, got {listen:?}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        self.server.address = host.to_string();
        self.server.port = port
            .parse()
            .with_context(|| format!("Invalid port in LISTEN: {port:?}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.workers == 0 {
            anyhow::bail!("server.workers must be at least 1");
        }
        if self.server.address.is_empty() {
            anyhow::bail!("server.address must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_override_splits_host_and_port() {
        let mut cfg = Config::default();
        cfg.apply_listen("0.0.0.0:3000").unwrap();
        assert_eq!(cfg.server.address, "0.0.0.0");
        assert_eq!(cfg.server.port, 3000);

        cfg.apply_listen("[::1]:9000").unwrap();
        assert_eq!(cfg.server.address, "::1");
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn listen_override_rejects_missing_port() {
        let mut cfg = Config::default();
        assert!(cfg.apply_listen("localhost").is_err());
        assert!(cfg.apply_listen("localhost:http").is_err());
    }
}
