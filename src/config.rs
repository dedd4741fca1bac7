use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE: &str = "config.json";

/// Largest exported image side, in pixels
pub const MAX_IMAGE_SIDE: u32 = 16384;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Platform directories for config and logs (None on exotic platforms)
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "SpecLive", "speclive")
}

/// Where the rolling log files go
pub fn log_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_local_dir().join("logs"))
}

// ========================================================================
// ACQUISITION
// ========================================================================

/// Device timing and signal-conditioning settings.
///
/// Copied into the scheduler when a session starts and never mutated by
/// the pipeline; changing any of these means starting a new session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Per-read integration time on the device (ms)
    pub integration_time_ms: u32,

    /// Raw reads averaged into one frame (>= 1)
    pub averages: u32,

    /// Boxcar half width in channels (0 = no smoothing)
    pub smoothing_half_width: usize,

    /// Wall-clock cadence of acquisition ticks (ms)
    pub refresh_period_ms: u64,

    /// Ask the device to subtract its dark baseline
    pub dark_correct: bool,

    /// Grace period past the expected busy time before a read counts as hung (ms)
    pub read_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            integration_time_ms: 10,
            averages: 1,
            smoothing_half_width: 1,
            refresh_period_ms: 100,
            dark_correct: true,
            read_timeout_ms: 2000,
        }
    }
}

impl AcquisitionConfig {
    pub fn integration_time(&self) -> Duration {
        Duration::from_millis(u64::from(self.integration_time_ms))
    }

    /// Integration time in the unit the device driver wants
    pub fn integration_time_micros(&self) -> u32 {
        self.integration_time_ms.saturating_mul(1000)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_period_ms)
    }

    /// How long one tick keeps the device busy: integration × averages
    pub fn expected_busy_time(&self) -> Duration {
        self.integration_time() * self.averages.max(1)
    }

    /// In-flight time after which an acquisition is reported as hung
    pub fn stall_limit(&self) -> Duration {
        self.expected_busy_time() + Duration::from_millis(self.read_timeout_ms)
    }
}

// ========================================================================
// EXPORT
// ========================================================================

/// Field separator for the data export
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Delimiter::Comma => "csv",
            Delimiter::Tab => "tsv",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory default-named exports are written into
    pub output_dir: PathBuf,

    /// File-name prefix for timestamped exports
    pub file_prefix: String,

    pub delimiter: Delimiter,

    /// Raster width of both exported images (px)
    pub image_width: u32,

    /// Height of the exported plot image (px)
    pub plot_height: u32,

    /// Height of the exported detector strip image (px)
    pub strip_height: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "usb2000".to_string(),
            delimiter: Delimiter::Comma,
            image_width: 1200,
            plot_height: 600,
            strip_height: 100,
        }
    }
}

// ========================================================================
// DISPLAY
// ========================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Rows the on-screen detector strip is expanded to
    pub strip_rows: usize,

    /// Max pointer-hover updates processed per second
    pub hover_rate_hz: u32,

    pub window_size: [f32; 2],
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            strip_rows: 50,
            hover_rate_hz: 60,
            window_size: [900.0, 600.0],
        }
    }
}

impl DisplayConfig {
    /// Minimum spacing between processed hover events
    pub fn hover_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.hover_rate_hz.max(1)))
    }
}

// ========================================================================
// APP CONFIG
// ========================================================================

/// Everything read from config.json at startup
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub acquisition: AcquisitionConfig,
    pub export: ExportConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Default location of config.json
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config.json from the platform config dir.
    ///
    /// A missing file writes the defaults out; an unreadable or invalid
    /// file is logged and replaced by defaults for this run.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_path() else {
            tracing::warn!("[Config] No config directory on this platform, using defaults");
            return Self::default();
        };

        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("[Config] Loaded {}", path.display());
                config
            }
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                match config.save(&path) {
                    Ok(()) => tracing::info!("[Config] Wrote defaults to {}", path.display()),
                    Err(e) => tracing::warn!("[Config] Could not write defaults: {}", e),
                }
                config
            }
            Err(e) => {
                tracing::warn!("[Config] {} ({}), using defaults", e, path.display());
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(io_err)
    }

    /// Reject settings the pipeline can't run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let acq = &self.acquisition;
        if acq.averages == 0 {
            return Err(ConfigError::Invalid("averages must be at least 1".into()));
        }
        if acq.integration_time_ms == 0 {
            return Err(ConfigError::Invalid("integration_time_ms must be positive".into()));
        }
        if acq.refresh_period_ms == 0 {
            return Err(ConfigError::Invalid("refresh_period_ms must be positive".into()));
        }

        let export = &self.export;
        if export.image_width == 0 || export.plot_height == 0 || export.strip_height == 0 {
            return Err(ConfigError::Invalid("export image sizes must be positive".into()));
        }
        if [export.image_width, export.plot_height, export.strip_height]
            .into_iter()
            .any(|side| side > MAX_IMAGE_SIDE)
        {
            return Err(ConfigError::Invalid(format!(
                "export image sizes must be at most {MAX_IMAGE_SIDE} px"
            )));
        }
        if export.file_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("file_prefix must not be empty".into()));
        }

        if self.display.hover_rate_hz == 0 {
            return Err(ConfigError::Invalid("hover_rate_hz must be positive".into()));
        }
        if self.display.strip_rows == 0 {
            return Err(ConfigError::Invalid("strip_rows must be positive".into()));
        }
        Ok(())
    }
}

// === Tests ===
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.integration_time_micros(), 10_000);
        assert_eq!(config.export.image_width, 1200);
    }

    #[test]
    fn test_busy_time_and_stall_limit() {
        let acq = AcquisitionConfig {
            integration_time_ms: 100,
            averages: 5,
            read_timeout_ms: 1000,
            ..Default::default()
        };
        assert_eq!(acq.expected_busy_time(), Duration::from_millis(500));
        assert_eq!(acq.stall_limit(), Duration::from_millis(1500));
    }

    #[test]
    fn test_validate_rejects_zero_averages() {
        let mut config = AppConfig::default();
        config.acquisition.averages = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.acquisition.averages = 3;
        config.acquisition.refresh_period_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_bounds_image_sizes() {
        let mut config = AppConfig::default();
        config.export.image_width = MAX_IMAGE_SIDE;
        assert!(config.validate().is_ok());

        config.export.plot_height = MAX_IMAGE_SIDE + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.acquisition.averages = 4;
        config.export.delimiter = Delimiter::Tab;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        // Missing sections and fields fall back to defaults
        fs::write(&path, r#"{ "acquisition": { "averages": 7 } }"#).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.acquisition.averages, 7);
        assert_eq!(loaded.acquisition.refresh_period_ms, 100);
        assert_eq!(loaded.export, ExportConfig::default());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Io { .. })));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));

        fs::write(&path, r#"{ "acquisition": { "averages": 0 } }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_delimiter_serde() {
        let json = serde_json::to_string(&Delimiter::Tab).unwrap();
        assert_eq!(json, "\"tab\"");
        assert_eq!(Delimiter::Tab.extension(), "tsv");
        assert_eq!(Delimiter::Comma.as_byte(), b',');
    }
}
