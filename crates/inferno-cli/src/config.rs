//! Device configuration – reads/writes `~/.inferno/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inferno_runtime::{BridgeConfig, CredentialQueue, DEFAULT_CONTROLLER_URL};
use zeroize::Zeroize;

/// Persisted device configuration stored in `~/.inferno/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity stamped on every telemetry record.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Ordered connection strings, primary first.  Stored as plain text;
    /// the file is created owner-only.
    #[serde(default)]
    pub connection_strings: Vec<String>,

    /// Base URL of the local controller API.
    #[serde(default = "default_controller_url")]
    pub controller_url: String,

    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    /// Time-to-live stamped on telemetry records; omitted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live_secs: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("device_id", &self.device_id)
            .field(
                "connection_strings",
                &format!("<{} redacted>", self.connection_strings.len()),
            )
            .field("controller_url", &self.controller_url)
            .field("telemetry_interval_secs", &self.telemetry_interval_secs)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("receive_timeout_secs", &self.receive_timeout_secs)
            .field("time_to_live_secs", &self.time_to_live_secs)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.connection_strings.zeroize();
    }
}

fn default_device_id() -> String {
    "inferno1".to_string()
}
fn default_controller_url() -> String {
    DEFAULT_CONTROLLER_URL.to_string()
}
fn default_telemetry_interval_secs() -> u64 {
    15
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_operation_timeout_secs() -> u64 {
    3600
}
fn default_receive_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            connection_strings: Vec::new(),
            controller_url: default_controller_url(),
            telemetry_interval_secs: default_telemetry_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            receive_timeout_secs: default_receive_timeout_secs(),
            time_to_live_secs: None,
        }
    }
}

impl Config {
    /// Bridge settings derived from this file.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            device_id: self.device_id.clone(),
            telemetry_interval: Duration::from_secs(self.telemetry_interval_secs.max(1)),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            receive_timeout: Duration::from_secs(self.receive_timeout_secs),
            time_to_live: self.time_to_live_secs,
        }
    }

    /// Parse the connection strings into the connection manager's queue.
    ///
    /// Fails on an empty list or on the first malformed entry.
    pub fn credentials(&self) -> Result<CredentialQueue, String> {
        CredentialQueue::parse_all(&self.connection_strings).map_err(|e| {
            format!("Invalid connection_strings in {}: {}", config_path().display(), e)
        })
    }
}

/// Return the path to `~/.inferno/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".inferno").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `INFERNO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `INFERNO_DEVICE_ID` | `device_id` |
/// | `INFERNO_CONTROLLER_URL` | `controller_url` |
/// | `INFERNO_TELEMETRY_INTERVAL_SECS` | `telemetry_interval_secs` |
/// | `INFERNO_CONNECTION_STRING` | `connection_strings` (replaced by this one entry) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("INFERNO_DEVICE_ID") {
        cfg.device_id = v;
    }
    if let Ok(v) = std::env::var("INFERNO_CONTROLLER_URL") {
        cfg.controller_url = v;
    }
    if let Ok(v) = std::env::var("INFERNO_TELEMETRY_INTERVAL_SECS")
        && let Ok(secs) = v.parse::<u64>()
        && secs > 0
    {
        cfg.telemetry_interval_secs = secs;
    }
    if let Ok(v) = std::env::var("INFERNO_CONNECTION_STRING") {
        cfg.connection_strings.zeroize();
        cfg.connection_strings = vec![v];
    }
}

/// Save the config to disk, creating `~/.inferno/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
