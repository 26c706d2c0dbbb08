//! Device config export/import files.
//!
//! A device profile is the on-device settings snapshot wrapped in a
//! versioned JSON envelope, so settings survive a factory reset or move
//! between devices.  Import validates the envelope before anything is
//! sent to the device.

use std::path::Path;

use lumideck_core::{DeviceConfig, ExportedDeviceConfig};
use thiserror::Error;

/// Error type for profile file operations.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to access profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile file: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown envelope version or out-of-range fields.
    #[error("profile cannot be imported: wrong version or out-of-range values")]
    NotImportable,
}

/// Writes `config` to `path` inside a versioned envelope.
pub fn export_to_file(path: &Path, config: DeviceConfig) -> Result<(), ProfileError> {
    let exported = ExportedDeviceConfig::new(config);
    let json = serde_json::to_string_pretty(&exported)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads a profile from `path`, rejecting envelopes this host cannot
/// safely apply.
pub fn import_from_file(path: &Path) -> Result<DeviceConfig, ProfileError> {
    let text = std::fs::read_to_string(path)?;
    let exported: ExportedDeviceConfig = serde_json::from_str(&text)?;
    if !exported.is_importable() {
        return Err(ProfileError::NotImportable);
    }
    Ok(exported.config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("lumideck_profile_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_export_then_import_round_trips() {
        let path = temp_path("roundtrip.json");
        let mut config = DeviceConfig::default();
        config.font_hue = 33;

        export_to_file(&path, config.clone()).expect("export");
        let imported = import_from_file(&path).expect("import");

        assert_eq!(imported, config);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_rejects_wrong_version() {
        let path = temp_path("stale.json");
        std::fs::write(
            &path,
            r#"{"version":99,"config":{"ui_speed":10,"sel_speed":10,"wrap_pause":10,"font_hue":0,"scroll_ms":10,"lyric_cps":8}}"#,
        )
        .unwrap();

        assert!(matches!(
            import_from_file(&path),
            Err(ProfileError::NotImportable)
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_rejects_out_of_range_values() {
        let path = temp_path("bad_range.json");
        std::fs::write(
            &path,
            r#"{"version":1,"config":{"ui_speed":0,"sel_speed":10,"wrap_pause":10,"font_hue":0,"scroll_ms":10,"lyric_cps":8}}"#,
        )
        .unwrap();

        assert!(matches!(
            import_from_file(&path),
            Err(ProfileError::NotImportable)
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_rejects_garbage_json() {
        let path = temp_path("garbage.json");
        std::fs::write(&path, "not json at all").unwrap();

        assert!(matches!(import_from_file(&path), Err(ProfileError::Json(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_import_missing_file_is_an_io_error() {
        let path = temp_path("does_not_exist.json");
        assert!(matches!(import_from_file(&path), Err(ProfileError::Io(_))));
    }
}
