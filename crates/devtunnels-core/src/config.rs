//! Configuration for the Dev Tunnels integration.
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global settings (`<config dir>/devtunnels/settings.json`)
//! 3. Environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::TunnelOptions;

/// Directory name used under the per-user config and data directories.
pub const APP_DIR: &str = "devtunnels";

/// User-facing message strings.
pub mod messages {
    pub const CLI_NOT_FOUND: &str = "Microsoft Dev Tunnels CLI not found. Installing automatically...";
    pub const INSTALLATION_FAILED: &str =
        "Failed to install Dev Tunnels CLI. Please install manually.";
    pub const AUTH_REQUIRED: &str =
        "Microsoft account authentication required. Please run authentication.";
    pub const AUTH_FAILED: &str =
        "Authentication failed. Please check your Microsoft account credentials.";
    pub const PORT_NOT_FOUND: &str = "No active web servers found on common ports.";
    pub const TUNNEL_CREATION_FAILED: &str =
        "Failed to create tunnel. Please check your configuration.";
    pub const CONNECTION_LOST: &str = "Tunnel connection lost. Attempting to reconnect...";
    pub const MAX_RETRIES_EXCEEDED: &str =
        "Maximum reconnection attempts exceeded. Manual intervention required.";

    pub const CLI_INSTALLED: &str = "Microsoft Dev Tunnels CLI installed successfully";
    pub const AUTH_SUCCESS: &str = "Successfully authenticated with Microsoft account";
    pub const TUNNEL_CREATED: &str = "Your app is live at";
    pub const TUNNEL_STOPPED: &str = "Tunnel stopped successfully";
    pub const RECONNECTED: &str = "Tunnel reconnected successfully";
}

/// Complete Dev Tunnels configuration. Durations are milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevTunnelsConfig {
    /// Ports probed when discovering local web servers.
    pub common_ports: Vec<u16>,

    /// Name of the wrapped CLI on `PATH`.
    pub cli_name: String,
    /// Explicit CLI binary; overrides every other lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<PathBuf>,
    pub version_flag: String,
    pub npm_package: String,
    pub winget_package: String,
    pub download_base_url: String,
    /// Where the direct-download strategy places the binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    /// Where the authentication snapshot is persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_cache_dir: Option<PathBuf>,

    pub health_check_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_base_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub reconnect_backoff_multiplier: f64,

    pub auth_timeout_ms: u64,
    pub auth_cache_window_ms: u64,
    pub token_refresh_threshold_ms: u64,

    pub process_timeout_ms: u64,
    pub cleanup_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub delete_timeout_ms: u64,
    pub install_timeout_ms: u64,
    pub uninstall_timeout_ms: u64,
    pub port_probe_timeout_ms: u64,

    pub default_tunnel_options: TunnelOptions,

    pub log_level: String,
    pub log_capacity: usize,
}

impl Default for DevTunnelsConfig {
    fn default() -> Self {
        Self {
            common_ports: vec![3000, 4000, 5000, 8000, 8080, 9000],
            cli_name: "devtunnel".to_string(),
            cli_path: None,
            version_flag: "--version".to_string(),
            npm_package: "@microsoft/dev-tunnels-cli".to_string(),
            winget_package: "Microsoft.DevTunnels".to_string(),
            download_base_url: "https://github.com/microsoft/dev-tunnels/releases/latest/download"
                .to_string(),
            install_dir: None,
            auth_cache_dir: None,
            health_check_interval_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_backoff_base_ms: 1_000,
            reconnect_backoff_max_ms: 60_000,
            reconnect_backoff_multiplier: 2.0,
            auth_timeout_ms: 60_000,
            auth_cache_window_ms: 300_000,
            token_refresh_threshold_ms: 300_000,
            process_timeout_ms: 30_000,
            cleanup_timeout_ms: 5_000,
            status_timeout_ms: 10_000,
            delete_timeout_ms: 15_000,
            install_timeout_ms: 120_000,
            uninstall_timeout_ms: 60_000,
            port_probe_timeout_ms: 500,
            default_tunnel_options: TunnelOptions::default(),
            log_level: "info".to_string(),
            log_capacity: crate::logging::DEFAULT_LOG_CAPACITY,
        }
    }
}

impl DevTunnelsConfig {
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub const fn reconnect_backoff_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_base_ms)
    }

    pub const fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub const fn auth_cache_window(&self) -> Duration {
        Duration::from_millis(self.auth_cache_window_ms)
    }

    pub const fn token_refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.token_refresh_threshold_ms)
    }

    pub const fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub const fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub const fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub const fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }

    pub const fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    pub const fn uninstall_timeout(&self) -> Duration {
        Duration::from_millis(self.uninstall_timeout_ms)
    }

    pub const fn port_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.port_probe_timeout_ms)
    }

    /// Directory holding the authentication cache file.
    pub fn auth_cache_dir(&self) -> PathBuf {
        self.auth_cache_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }

    /// Full path of the authentication cache file.
    pub fn auth_cache_file(&self) -> PathBuf {
        self.auth_cache_dir().join("auth-cache.json")
    }

    /// Directory the direct-download strategy installs into.
    pub fn install_dir(&self) -> PathBuf {
        self.install_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("bin")
        })
    }

    /// Path of the binary managed by the direct-download strategy.
    pub fn managed_binary_path(&self) -> PathBuf {
        let file = if cfg!(windows) {
            format!("{}.exe", self.cli_name)
        } else {
            self.cli_name.clone()
        };
        self.install_dir().join(file)
    }

    /// The program to invoke for the wrapped CLI: explicit path, then the
    /// managed binary if it exists, then the bare name resolved via `PATH`.
    pub fn cli_program(&self) -> PathBuf {
        if let Some(path) = &self.cli_path {
            return path.clone();
        }
        let managed = self.managed_binary_path();
        if managed.is_file() {
            return managed;
        }
        PathBuf::from(&self.cli_name)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config() -> Result<DevTunnelsConfig> {
    load_config_from(global_config_path().as_deref(), |key| std::env::var(key).ok())
}

/// Load configuration from an explicit settings file and environment lookup.
pub fn load_config_from(
    settings: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DevTunnelsConfig> {
    let mut config = match settings {
        Some(path) if path.exists() => load_config_file(path)?,
        _ => DevTunnelsConfig::default(),
    };
    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<DevTunnelsConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read config file {}", path.display())).with_source(e)
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::config(format!("Failed to parse config file {}", path.display())).with_source(e)
    })
}

fn apply_env_overrides(config: &mut DevTunnelsConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("DEVTUNNELS_CLI_PATH") {
        config.cli_path = Some(PathBuf::from(val));
    }
    if let Some(val) = env("DEVTUNNELS_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = env("DEVTUNNELS_MAX_RECONNECT_ATTEMPTS") {
        if let Ok(n) = val.parse() {
            config.max_reconnect_attempts = n;
        }
    }
    if let Some(val) = env("DEVTUNNELS_HEALTH_CHECK_INTERVAL_MS") {
        if let Ok(n) = val.parse() {
            config.health_check_interval_ms = n;
        }
    }
    if let Some(val) = env("DEVTUNNELS_DOWNLOAD_BASE_URL") {
        config.download_base_url = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ErrorCode;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_documented_constants() {
        let config = DevTunnelsConfig::default();
        assert_eq!(config.common_ports, vec![3000, 4000, 5000, 8000, 8080, 9000]);
        assert_eq!(config.cli_name, "devtunnel");
        assert_eq!(config.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_backoff_base(), Duration::from_secs(1));
        assert_eq!(config.auth_timeout(), Duration::from_secs(60));
        assert_eq!(config.token_refresh_threshold(), Duration::from_secs(300));
        assert_eq!(config.process_timeout(), Duration::from_secs(30));
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(5));
        assert!(config.default_tunnel_options.allow_anonymous);
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config_from(Some(&dir.path().join("settings.json")), no_env).unwrap();
        assert_eq!(config.cli_name, "devtunnel");
    }

    #[test]
    fn partial_settings_file_keeps_other_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"maxReconnectAttempts": 9, "commonPorts": [5173]}"#).unwrap();

        let config = load_config_from(Some(&path), no_env).unwrap();
        assert_eq!(config.max_reconnect_attempts, 9);
        assert_eq!(config.common_ports, vec![5173]);
        assert_eq!(config.health_check_interval_ms, 30_000);
    }

    #[test]
    fn invalid_settings_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_config_from(Some(&path), no_env).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        assert_eq!(err.component(), "Config");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"healthCheckIntervalMs": 1000}"#).unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("DEVTUNNELS_HEALTH_CHECK_INTERVAL_MS", "2500"),
            ("DEVTUNNELS_MAX_RECONNECT_ATTEMPTS", "not-a-number"),
            ("DEVTUNNELS_CLI_PATH", "/opt/devtunnel"),
        ]);
        let config =
            load_config_from(Some(&path), |k| env.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.health_check_interval_ms, 2500);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.cli_program(), PathBuf::from("/opt/devtunnel"));
    }

    #[test]
    fn cli_program_prefers_managed_binary() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DevTunnelsConfig {
            install_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(config.cli_program(), PathBuf::from("devtunnel"));

        std::fs::write(config.managed_binary_path(), b"bin").unwrap();
        assert_eq!(config.cli_program(), config.managed_binary_path());
    }

    #[test]
    fn auth_cache_file_lives_in_cache_dir() {
        let config = DevTunnelsConfig {
            auth_cache_dir: Some(PathBuf::from("/tmp/dt")),
            ..Default::default()
        };
        assert_eq!(config.auth_cache_file(), PathBuf::from("/tmp/dt/auth-cache.json"));
    }
}
