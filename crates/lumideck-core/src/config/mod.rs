//! On-device configuration schema and its `CFG` wire formats.
//!
//! The device owns a small set of UI tuning knobs.  The host reads them with
//! `CFG GET` (answered by a `CFG SET k=v k=v ...` line), and writes them
//! back with `CFG IMPORT <json>` (answered by `CFG IMPORT OK`).  Exports to
//! disk wrap the config in a versioned envelope so stale files are rejected
//! on import.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Schema version written into exported config files.
pub const EXPORT_VERSION: u32 = 1;

/// The tunable settings stored on the device.
///
/// Each field carries the device firmware's valid range; [`is_valid`]
/// enforces them before anything is sent back to the device.
///
/// [`is_valid`]: DeviceConfig::is_valid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Idle UI animation speed, 1..=50.
    #[serde(default = "default_ui_speed")]
    pub ui_speed: u32,
    /// Menu selection animation speed, 1..=50.
    #[serde(default = "default_sel_speed")]
    pub sel_speed: u32,
    /// Pause at line-wrap boundaries, 0..=50.
    #[serde(default = "default_wrap_pause")]
    pub wrap_pause: u32,
    /// Display font hue step, 0..=50.
    #[serde(default = "default_font_hue")]
    pub font_hue: u32,
    /// Marquee scroll tick, 1..=50.
    #[serde(default = "default_scroll_ms")]
    pub scroll_ms: u32,
    /// Lyric scroll rate in characters per second, 1..=30.
    #[serde(default = "default_lyric_cps")]
    pub lyric_cps: u32,
}

fn default_ui_speed() -> u32 {
    10
}
fn default_sel_speed() -> u32 {
    10
}
fn default_wrap_pause() -> u32 {
    10
}
fn default_font_hue() -> u32 {
    0
}
fn default_scroll_ms() -> u32 {
    10
}
fn default_lyric_cps() -> u32 {
    8
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ui_speed: default_ui_speed(),
            sel_speed: default_sel_speed(),
            wrap_pause: default_wrap_pause(),
            font_hue: default_font_hue(),
            scroll_ms: default_scroll_ms(),
            lyric_cps: default_lyric_cps(),
        }
    }
}

impl DeviceConfig {
    /// Checks every field against the firmware's accepted range.
    pub fn is_valid(&self) -> bool {
        (1..=50).contains(&self.ui_speed)
            && (1..=50).contains(&self.sel_speed)
            && self.wrap_pause <= 50
            && self.font_hue <= 50
            && (1..=50).contains(&self.scroll_ms)
            && (1..=30).contains(&self.lyric_cps)
    }

    /// Parses a `CFG SET k=v k=v ...` response line.
    ///
    /// Unknown keys are ignored so newer firmware can report fields this
    /// host does not know about.  Returns `None` when the line is not a
    /// `CFG SET` response at all.
    pub fn parse_response(line: &str) -> Option<Self> {
        let line = line.trim();
        let prefix_matches = line
            .as_bytes()
            .get(..7)
            .is_some_and(|head| head.eq_ignore_ascii_case(b"CFG SET"));
        if !prefix_matches {
            return None;
        }

        let mut config = Self::default();
        for pair in line[7..].split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let Ok(value) = value.parse::<u32>() else {
                continue;
            };
            match key {
                "ui_speed" => config.ui_speed = value,
                "sel_speed" => config.sel_speed = value,
                "wrap_pause" => config.wrap_pause = value,
                "font_hue" => config.font_hue = value,
                "scroll_ms" => config.scroll_ms = value,
                "lyric_cps" => config.lyric_cps = value,
                _ => debug!("ignoring unknown config key {key}"),
            }
        }
        Some(config)
    }

    /// Builds the `CFG IMPORT <json>` line that writes this config to the
    /// device.  The JSON is emitted with a fixed key order so the line is
    /// deterministic.
    pub fn import_payload(&self) -> String {
        format!(
            "CFG IMPORT {{\"ui_speed\":{},\"sel_speed\":{},\"wrap_pause\":{},\"font_hue\":{},\"scroll_ms\":{},\"lyric_cps\":{}}}",
            self.ui_speed, self.sel_speed, self.wrap_pause, self.font_hue, self.scroll_ms, self.lyric_cps
        )
    }
}

/// Versioned envelope for config files exported to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedDeviceConfig {
    pub version: u32,
    pub config: DeviceConfig,
}

impl ExportedDeviceConfig {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            version: EXPORT_VERSION,
            config,
        }
    }

    /// True when the file can be imported: known version, fields in range.
    pub fn is_importable(&self) -> bool {
        self.version == EXPORT_VERSION && self.config.is_valid()
    }
}
