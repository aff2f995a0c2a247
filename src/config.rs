//! Settings: where the native library lives, its diagnostic output, and
//! the camera configuration to apply after opening.
//!
//! ```toml
//! [library]
//! path = "/usr/local/lib/libfli.so"
//! debug_level = "warn"
//! debug_log = "/tmp/fli.log"
//!
//! [camera]
//! exposure_ms = 1500
//! frame_type = "dark"
//! hbin = 2
//! vbin = 2
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::native::NativeLibrary;
use crate::traits::{Area, BitDepth, DebugLevel, FliApi, FrameType, Result};

/// Environment variable overriding [`LibrarySettings::path`].
pub const LIBRARY_PATH_ENV: &str = "FLI_LIBRARY_PATH";

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Native library location and diagnostics.
    pub library: LibrarySettings,
    /// Camera configuration applied after opening.
    pub camera: CameraConfig,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply `FLI_LIBRARY_PATH`, if set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = env::var_os(LIBRARY_PATH_ENV) {
            self.library.path = Some(PathBuf::from(path));
        }
        self
    }
}

/// Where to find the vendor library and how chatty it should be.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// Library file; the platform default name when unset.
    pub path: Option<PathBuf>,
    /// Native diagnostic verbosity.
    pub debug_level: DebugLevel,
    /// Native diagnostic destination.
    pub debug_log: Option<PathBuf>,
}

impl LibrarySettings {
    /// Load the library and apply the debug level.
    pub fn load(&self) -> Result<NativeLibrary> {
        let lib = match &self.path {
            Some(path) => NativeLibrary::load(path)?,
            None => NativeLibrary::load_default()?,
        };
        lib.set_debug_level(self.debug_log.as_deref(), self.debug_level)?;
        Ok(lib)
    }
}

/// Camera settings; unset fields leave the device as it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Exposure time in milliseconds.
    pub exposure_ms: Option<i64>,
    /// Frame type.
    pub frame_type: Option<FrameType>,
    /// Image area to read out.
    pub image_area: Option<Area>,
    /// Horizontal binning.
    pub hbin: Option<i64>,
    /// Vertical binning.
    pub vbin: Option<i64>,
    /// Digitization depth.
    pub bit_depth: Option<BitDepth>,
    /// Flushes before each exposure.
    pub flushes: Option<i64>,
    /// Cooler set point in degrees Celsius.
    pub temperature: Option<f64>,
}

impl CameraConfig {
    /// Combine with `overrides`: each field set there replaces the one here.
    #[must_use]
    pub fn merge(self, overrides: Self) -> Self {
        Self {
            exposure_ms: overrides.exposure_ms.or(self.exposure_ms),
            frame_type: overrides.frame_type.or(self.frame_type),
            image_area: overrides.image_area.or(self.image_area),
            hbin: overrides.hbin.or(self.hbin),
            vbin: overrides.vbin.or(self.vbin),
            bit_depth: overrides.bit_depth.or(self.bit_depth),
            flushes: overrides.flushes.or(self.flushes),
            temperature: overrides.temperature.or(self.temperature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml(
            r#"
            [library]
            path = "/opt/fli/libfli.so"
            debug_level = "all"

            [camera]
            exposure_ms = 1500
            frame_type = "dark"
            bit_depth = "16"
            image_area = { ul_x = 0, ul_y = 0, lr_x = 1024, lr_y = 1024 }
            temperature = -20.0
            "#,
        )
        .expect("settings should parse");

        assert_eq!(settings.library.path, Some(PathBuf::from("/opt/fli/libfli.so")));
        assert_eq!(settings.library.debug_level, DebugLevel::All);
        assert_eq!(settings.camera.exposure_ms, Some(1500));
        assert_eq!(settings.camera.frame_type, Some(FrameType::Dark));
        assert_eq!(settings.camera.bit_depth, Some(BitDepth::Sixteen));
        assert_eq!(settings.camera.image_area, Some(Area::new(0, 0, 1024, 1024)));
        assert_eq!(settings.camera.hbin, None);
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = Settings::from_toml("").expect("empty settings");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.library.debug_level, DebugLevel::None);
    }

    #[test]
    fn test_unknown_camera_key_rejected() {
        let result = Settings::from_toml("[camera]\ngain = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[camera]\nhbin = 4\nvbin = 4").expect("write");

        let settings = Settings::from_file(file.path()).expect("load");
        assert_eq!(settings.camera.hbin, Some(4));
        assert_eq!(settings.camera.vbin, Some(4));
    }

    #[test]
    #[serial]
    fn test_env_overrides_library_path() {
        let settings = Settings::from_toml("[library]\npath = \"/opt/fli/libfli.so\"\n")
            .expect("settings should parse");

        env::set_var(LIBRARY_PATH_ENV, "/usr/local/lib/libfli.so");
        let overridden = settings.clone().with_env_overrides();
        env::remove_var(LIBRARY_PATH_ENV);

        assert_eq!(
            overridden.library.path,
            Some(PathBuf::from("/usr/local/lib/libfli.so"))
        );

        let untouched = settings.with_env_overrides();
        assert_eq!(untouched.library.path, Some(PathBuf::from("/opt/fli/libfli.so")));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = CameraConfig {
            exposure_ms: Some(100),
            hbin: Some(1),
            flushes: Some(3),
            ..CameraConfig::default()
        };
        let overrides = CameraConfig {
            exposure_ms: Some(2000),
            frame_type: Some(FrameType::Flood),
            ..CameraConfig::default()
        };

        let merged = base.merge(overrides);

        assert_eq!(merged.exposure_ms, Some(2000));
        assert_eq!(merged.frame_type, Some(FrameType::Flood));
        assert_eq!(merged.hbin, Some(1));
        assert_eq!(merged.flushes, Some(3));
        assert_eq!(merged.vbin, None);
    }
}
