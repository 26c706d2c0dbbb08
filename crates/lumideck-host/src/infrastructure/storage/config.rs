//! TOML-based configuration persistence for the host application.
//!
//! Reads and writes `HostConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Lumideck\config.toml`
//! - Linux:    `~/.config/lumideck/config.toml`
//! - macOS:    `~/Library/Application Support/Lumideck/config.toml`
//!
//! Besides user settings, this file remembers the last link endpoints
//! (serial port name, BLE peripheral id and name) so reconnection after a
//! restart can go straight to the known device instead of scanning cold.
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return
//! value of `some_fn()` when absent from the file, so the app works on
//! first run and when upgrading from an older file missing newer fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::link::LinkPolicy;

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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub host: GeneralConfig,
    #[serde(default)]
    pub link: LinkEndpoints,
    #[serde(default)]
    pub lyrics: LyricsConfig,
}

/// General host behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Link policy plus the remembered endpoints from the last session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkEndpoints {
    /// Which media the link manager may use.
    #[serde(default)]
    pub policy: LinkPolicy,
    /// Serial port that carried the last session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_port: Option<String>,
    /// Peripheral id of the last BLE session's device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ble_id: Option<String>,
    /// Advertised name of that device, used as a scan hint and for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ble_name: Option<String>,
    /// USB vendor id to prefer when ordering serial ports, hex (e.g. "1A86").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_vid: Option<String>,
    /// USB product id paired with `usb_vid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_pid: Option<String>,
}

/// Lyric lookup service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LyricsConfig {
    /// Base URL of the lyric lookup service.
    #[serde(default = "default_lyrics_endpoint")]
    pub endpoint: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_lyrics_endpoint() -> String {
    "https://music.163.com".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LinkEndpoints {
    fn default() -> Self {
        Self {
            policy: LinkPolicy::default(),
            last_port: None,
            last_ble_id: None,
            last_ble_name: None,
            usb_vid: None,
            usb_pid: None,
        }
    }
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_lyrics_endpoint(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

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
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `HostConfig` from disk, returning `HostConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<HostConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: HostConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Lumideck"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lumideck"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Lumideck")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
