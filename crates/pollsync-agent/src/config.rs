//! Agent configuration.
//!
//! Configuration is read from the first file found among:
//! - an explicit `--config` path
//! - `pollsync.toml`
//! - `/etc/pollsync/pollsync.toml`
//! - `~/.config/pollsync/pollsync.toml`
//!
//! and then overridden by `POLLSYNC_*` environment variables, with `__`
//! separating sections (`POLLSYNC_SERVER__URL`, `POLLSYNC_SYNC__POLLS=a,b`).

use anyhow::{Context, Result};
use pollsync_core::EngineConfig;
use pollsync_protocol::{PollId, DEFAULT_SOCKET_PATH};
use pollsync_transport::{ReconnectConfig, WebSocketConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "pollsync.toml",
    "/etc/pollsync/pollsync.toml",
    "~/.config/pollsync/pollsync.toml",
];

const ENV_PREFIX: &str = "POLLSYNC";

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Poll server connection.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// What to keep in sync.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Status endpoint configuration.
    #[serde(default)]
    pub status: StatusConfig,
}

/// Poll server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the poll server.
    #[serde(default = "default_url")]
    pub url: String,

    /// Socket.IO endpoint path.
    #[serde(default = "default_socket_path")]
    pub path: String,

    /// Connect and handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Reconnection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Give up after this many consecutive failures. Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// What to keep in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Polls to mount detail views for.
    #[serde(default)]
    pub polls: Vec<PollId>,

    /// Mount the poll list view.
    #[serde(default)]
    pub list: bool,

    /// Where to navigate when a watched poll is deleted.
    #[serde(default = "default_home_location")]
    pub home_location: String,

    /// Mark mounted views stale after a reconnect.
    #[serde(default)]
    pub invalidate_on_reconnect: bool,

    /// JSON snapshot to seed the cache from.
    #[serde(default)]
    pub snapshot: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Serve `/health` and `/status`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host to bind to.
    #[serde(default = "default_status_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_status_port")]
    pub port: u16,
}

// Default value functions
fn default_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_home_location() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8088
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            path: default_socket_path(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            polls: Vec::new(),
            list: false,
            home_location: default_home_location(),
            invalidate_on_reconnect: false,
            snapshot: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the first default path that exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };
        Self::build(file.as_deref(), config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render config")
    }

    fn build(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let env = env
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("sync.polls");

        builder
            .add_source(env)
            .build()
            .and_then(|built| built.try_deserialize::<Self>())
            .with_context(|| match file {
                Some(path) => format!("Failed to load config from {}", path.display()),
                None => "Failed to load config from environment".to_string(),
            })
    }

    /// Status endpoint address.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn status_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.status.host, self.status.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid status address {}:{}",
                    self.status.host, self.status.port
                )
            })
    }

    /// Snapshot path with `~` expanded.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.sync
            .snapshot
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }

    /// WebSocket connector settings.
    #[must_use]
    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.server.url.clone(),
            path: self.server.path.clone(),
            handshake_timeout: Duration::from_millis(self.server.handshake_timeout_ms),
            ..WebSocketConfig::default()
        }
    }

    /// Adapter reconnection policy.
    #[must_use]
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Sync engine settings.
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            home_location: self.sync.home_location.clone(),
            invalidate_on_reconnect: self.sync.invalidate_on_reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pollsync-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.url, "http://localhost:3000");
        assert_eq!(config.server.path, "/socket.io/");
        assert_eq!(config.sync.home_location, "/");
        assert!(config.sync.polls.is_empty());
        assert!(!config.metrics.enabled);
        assert!(config.status.enabled);
        assert_eq!(config.status_addr().unwrap().port(), 8088);
        assert_eq!(config.reconnect().max_attempts, None);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [server]
            url = "https://polls.example.com"

            [reconnect]
            initial_delay_ms = 250
            max_attempts = 8

            [sync]
            polls = ["p1", "p2"]
            list = true
            home_location = "/polls"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.url, "https://polls.example.com");
        assert_eq!(config.server.handshake_timeout_ms, 10_000);
        assert_eq!(config.sync.polls, vec!["p1".to_string(), "p2".to_string()]);
        assert!(config.sync.list);

        let reconnect = config.reconnect();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(reconnect.max_attempts, Some(8));
        assert_eq!(config.engine().home_location, "/polls");
    }

    #[test]
    fn test_file_then_environment() {
        let path = temp_file(
            "layered.toml",
            r#"
                [server]
                url = "http://file.example.com"

                [status]
                port = 9999
            "#,
        );

        let config = Config::build(
            Some(&path),
            env(&[
                ("POLLSYNC_SERVER__URL", "http://env.example.com"),
                ("POLLSYNC_SYNC__POLLS", "p1,p2"),
                ("POLLSYNC_SYNC__INVALIDATE_ON_RECONNECT", "true"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.url, "http://env.example.com");
        assert_eq!(config.status.port, 9999);
        assert_eq!(config.sync.polls, vec!["p1".to_string(), "p2".to_string()]);
        assert!(config.sync.invalidate_on_reconnect);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let missing = std::env::temp_dir().join("pollsync-does-not-exist.toml");
        assert!(Config::build(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_toml_rendering_round_trips() {
        let mut config = Config::default();
        config.sync.polls = vec!["p1".into()];
        config.reconnect.max_attempts = Some(4);

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.sync.polls, vec!["p1".to_string()]);
        assert_eq!(parsed.reconnect.max_attempts, Some(4));
        assert_eq!(parsed.status.port, 8088);
    }

    #[test]
    fn test_snapshot_path_expands_tilde() {
        let mut config = Config::default();
        assert!(config.snapshot_path().is_none());

        config.sync.snapshot = Some("/var/lib/pollsync/snapshot.json".into());
        assert_eq!(
            config.snapshot_path().unwrap(),
            PathBuf::from("/var/lib/pollsync/snapshot.json")
        );
    }
}
