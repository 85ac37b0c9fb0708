//! Configuration resolution for Helix.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/helix/settings.json)
//! 3. Explicit config file (e.g. `--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the caller)
//!
//! Config files may be partial: any field left out keeps the value from the
//! layer below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default key server host.
pub const DEFAULT_SERVER_ADDRESS: &str = "service.blakfx.us";
/// Default key server port.
pub const DEFAULT_SERVER_PORT: u16 = 5567;
/// Longest response delay the key server is expected to produce.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 4500;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Complete Helix configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Where the key server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Client engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Device id, account keys and pinned servers live here.
    /// `None` means the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Default bound for recipient searches.
    pub search_timeout_ms: u64,
    pub worker_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl ClientConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// Configured data directory, falling back to the platform default.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(default_data_dir)
    }
}

/// On-disk shape of a (possibly partial) config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    server: ServerOverlay,
    client: ClientOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerOverlay {
    address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ClientOverlay {
    data_dir: Option<PathBuf>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    search_timeout_ms: Option<u64>,
    worker_threads: Option<usize>,
}

/// Load configuration with hierarchical resolution from the process
/// environment.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    load_config_with(explicit, global_config_path().as_deref(), |key| {
        std::env::var(key).ok()
    })
}

/// Load configuration reading the environment through `env`.
pub fn load_config_with(
    explicit: Option<&Path>,
    global: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global
        && global_path.exists()
    {
        merge_config(&mut config, load_config_file(global_path)?);
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_config(&mut config, load_config_file(path)?);
    }

    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("helix").join("settings.json"))
}

/// Platform data directory for device and account state.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("helix"))
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigFile) {
    if let Some(address) = overlay.server.address {
        base.server.address = address;
    }
    if let Some(port) = overlay.server.port {
        base.server.port = port;
    }

    let client = overlay.client;
    if client.data_dir.is_some() {
        base.client.data_dir = client.data_dir;
    }
    if let Some(ms) = client.connect_timeout_ms {
        base.client.connect_timeout_ms = ms;
    }
    if let Some(ms) = client.request_timeout_ms {
        base.client.request_timeout_ms = ms;
    }
    if let Some(ms) = client.search_timeout_ms {
        base.client.search_timeout_ms = ms;
    }
    if let Some(n) = client.worker_threads {
        base.client.worker_threads = n;
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("HELIX_SERVER") {
        config.server.address = val;
    }
    if let Some(n) = env("HELIX_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = n;
    }
    if let Some(val) = env("HELIX_DATA_DIR") {
        config.client.data_dir = Some(PathBuf::from(val));
    }
    if let Some(n) = env("HELIX_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.client.connect_timeout_ms = n;
    }
    if let Some(n) = env("HELIX_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.client.request_timeout_ms = n;
    }
    if let Some(n) = env("HELIX_SEARCH_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.client.search_timeout_ms = n;
    }
}
