//! Configuration and calibration store.
//!
//! Settings are loaded with Figment from a TOML document merged with
//! environment variables (prefixed with `GRAD_DAQ_`, sections separated by
//! `__`). The same document doubles as the calibration store: the
//! `[calibration]` table carries the distance-per-step scale factor derived
//! by the calibration routine and the last known carriage position flushed
//! at shutdown.
//!
//! Writes go through [`CalibrationStore`], which rewrites the whole document
//! atomically (write to a temp file in the same directory, then rename).
//! A concurrent writer in another process still follows last-writer-wins,
//! but a reader can never observe a torn document.
//!
//! # Example
//! ```no_run
//! use grad_daq::config::{CalibrationStore, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CalibrationStore::new(Settings::default_path());
//! let settings = store.load_or_init()?;
//! println!("cm/step: {}", settings.calibration.cm_per_step);
//! # Ok(())
//! # }
//! ```

use crate::error::{GradError, GradResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Data output settings
    #[serde(default)]
    pub data: DataSettings,
    /// Persisted calibration record
    #[serde(default)]
    pub calibration: CalibrationRecord,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Where acquired runs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Output directory for per-repeat CSV files
    pub output_dir: PathBuf,
}

/// The persisted calibration document.
///
/// External readers tolerate last-writer-wins across processes; within this
/// process every rewrite is atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Displacement commanded during the calibration routine, in cm
    pub cal_distance_cm: f64,
    /// Distance travelled per motor step, in cm (always positive)
    pub cm_per_step: f64,
    /// Carriage position flushed at the last clean shutdown, in cm
    pub last_position_cm: f64,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "grad-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self {
            cal_distance_cm: 80.0,
            cm_per_step: 0.1,
            last_position_cm: 0.0,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            data: DataSettings::default(),
            calibration: CalibrationRecord::default(),
        }
    }
}

impl Settings {
    /// Default location of the settings document.
    ///
    /// Prefers `config/gradiometer.toml` next to the working directory; if
    /// that does not exist but a per-user config does, the per-user path is
    /// used instead.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("config/gradiometer.toml");
        if local.exists() {
            return local;
        }
        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("grad-daq").join("gradiometer.toml");
            if user.exists() {
                return user;
            }
        }
        local
    }

    /// Load settings from a specific file path merged with environment
    /// variables.
    ///
    /// Example override: `GRAD_DAQ_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GradResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GRAD_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> GradResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(GradError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.calibration.cm_per_step.is_finite() && self.calibration.cm_per_step > 0.0) {
            return Err(GradError::Configuration(format!(
                "Invalid cm_per_step {}. Must be a positive number",
                self.calibration.cm_per_step
            )));
        }

        if !(self.calibration.cal_distance_cm.is_finite() && self.calibration.cal_distance_cm > 0.0)
        {
            return Err(GradError::Configuration(format!(
                "Invalid cal_distance_cm {}. Must be a positive number",
                self.calibration.cal_distance_cm
            )));
        }

        Ok(())
    }
}

/// Handle to the on-disk settings document.
///
/// All mutation goes through read-modify-write of the full document followed
/// by an atomic rename, so a half-written file can never be observed.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    /// Create a store handle for the given document path.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the settings document.
    pub fn load(&self) -> GradResult<Settings> {
        if !self.path.exists() {
            return Err(GradError::Storage(format!(
                "Settings document not found: {}",
                self.path.display()
            )));
        }
        let settings = Settings::load_from(&self.path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load the document, writing defaults first if it does not exist yet.
    pub fn load_or_init(&self) -> GradResult<Settings> {
        if !self.path.exists() {
            self.save(&Settings::default())?;
        }
        self.load()
    }

    /// Atomically rewrite the whole document.
    pub fn save(&self, settings: &Settings) -> GradResult<()> {
        let serialized = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        // Temp file must live on the same filesystem for rename to be atomic.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist a freshly derived distance-per-step value.
    ///
    /// Reads the full document, mutates the one field, and writes the whole
    /// document back atomically. On any failure the previous record is left
    /// intact on disk.
    pub fn update_cm_per_step(&self, cm_per_step: f64) -> GradResult<()> {
        if !(cm_per_step.is_finite() && cm_per_step > 0.0) {
            return Err(GradError::InvalidInput(format!(
                "cm_per_step must be a positive number, got {cm_per_step}"
            )));
        }
        let mut settings = self.load()?;
        settings.calibration.cm_per_step = cm_per_step;
        self.save(&settings)
    }

    /// Persist the last known carriage position (shutdown hook).
    pub fn update_last_position(&self, position_cm: f64) -> GradResult<()> {
        if !position_cm.is_finite() {
            return Err(GradError::InvalidInput(format!(
                "last position must be finite, got {position_cm}"
            )));
        }
        let mut settings = self.load()?;
        settings.calibration.last_position_cm = position_cm;
        self.save(&settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> CalibrationStore {
        CalibrationStore::new(dir.path().join("gradiometer.toml"))
    }

    #[test]
    fn init_writes_defaults() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(&dir);
        let settings = store.load_or_init().expect("init");
        assert_eq!(settings.calibration.cal_distance_cm, 80.0);
        assert!(store.path().exists());
    }

    #[test]
    fn update_preserves_other_fields() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(&dir);
        let mut settings = Settings::default();
        settings.calibration.cal_distance_cm = 42.0;
        store.save(&settings).expect("save");

        store.update_cm_per_step(0.25).expect("update");

        let reread = store.load().expect("load");
        assert_eq!(reread.calibration.cm_per_step, 0.25);
        assert_eq!(reread.calibration.cal_distance_cm, 42.0);
    }

    #[test]
    fn update_rejects_nonpositive_scale() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(&dir);
        store.load_or_init().expect("init");
        assert!(matches!(
            store.update_cm_per_step(0.0),
            Err(GradError::InvalidInput(_))
        ));
        assert!(matches!(
            store.update_cm_per_step(f64::NAN),
            Err(GradError::InvalidInput(_))
        ));
    }

    #[test]
    fn update_fails_on_missing_document() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(&dir);
        assert!(matches!(
            store.update_cm_per_step(0.1),
            Err(GradError::Storage(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_calibration() {
        let mut settings = Settings::default();
        settings.calibration.cm_per_step = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn last_position_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(&dir);
        store.load_or_init().expect("init");
        store.update_last_position(12.5).expect("update");
        let settings = store.load().expect("load");
        assert_eq!(settings.calibration.last_position_cm, 12.5);
    }
}
