//! TOML-based configuration for the toolkit.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MiHomeToolkit\config.toml`
//! - Linux:    `~/.config/mihome-toolkit/config.toml`
//! - macOS:    `~/Library/Application Support/MiHomeToolkit/config.toml`
//!
//! Everything in the file is optional; a missing file is the same as an
//! empty one, and command-line flags override whatever the file says.
//! Example:
//!
//! ```toml
//! [account]
//! username = "user@example.com"
//! password = "hunter2"
//! passport_device_id = "3C861A5C-3E85-4293-A54B-DDDD65531D8F"
//!
//! [discovery]
//! timeout_secs = 10
//! targets = ["192.168.1.45"]
//! ```
//!
//! Credentials live here precisely so they never have to be baked into a
//! script or shell history; keep the file readable only by its owner.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use miio_proto::DEFAULT_PORT;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

/// Cloud account credentials. All optional: LAN discovery works without
/// an account, and the `devices` command also accepts credentials via
/// flags or environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccountConfig {
    /// Account username: email, phone number, or numeric Mi id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Account password, stored in plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Stable `PassportDeviceId`; omit to generate a fresh one per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passport_device_id: Option<String>,
    /// Device API base URL, e.g. `https://de.api.io.mi.com/app` for
    /// accounts registered in Europe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

/// LAN discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    /// Local interface to bind. `"0.0.0.0"` listens on all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination UDP port for probes.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Discovery session length in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Unicast probe targets for networks that filter broadcast traffic.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Device id (8 hex chars) that ends a session early when it answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_device_id: Option<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_timeout_secs() -> u64 {
    10
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            targets: Vec::new(),
            target_device_id: None,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config
/// base directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform location, returning
/// `AppConfig::default()` if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from an explicit path, with the same missing-file
/// behavior as [`load_config`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            debug!("loaded config from {}", path.display());
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config file at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MiHomeToolkit"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mihome-toolkit"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MiHomeToolkit")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
