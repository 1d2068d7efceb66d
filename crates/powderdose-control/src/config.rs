use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use powderdose_frame::{Direction, FilterType};
use powderdose_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispense::DispenseConfig;
use crate::error::ConfigError;
use crate::measure::MeasureSettings;
use crate::purge::PurgeConfig;
use crate::table::CalibrationTable;

/// Configuration file used when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Operator-facing defaults for the rig's procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Sensitivity test repetitions.
    pub reps: u32,
    /// Sensitivity test samples per repetition.
    pub samples: u32,
    /// Reply timeout for ordinary commands, in seconds.
    pub timeout_secs: f64,
    /// How long to wait for the ready banner, in seconds.
    pub ready_timeout_secs: f64,
    pub dispense_direction: Direction,
    pub auger: String,
    pub powder: String,
    /// Raw readings averaged per scale calibration point.
    pub num_meas: u32,
    pub mix_secs: f64,
    pub drain_secs: f64,
    pub flush_secs: f64,
    pub flush_volume: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            reps: 3,
            samples: 5,
            timeout_secs: 10.0,
            ready_timeout_secs: 10.0,
            dispense_direction: Direction::Forward,
            auger: "8mm_base".to_string(),
            powder: "dishwasher_salt".to_string(),
            num_meas: 10,
            mix_secs: 10.0,
            drain_secs: 10.0,
            flush_secs: 1.0,
            flush_volume: 1.0,
        }
    }
}

/// The whole rig configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub calibration: CalibrationTable,
    pub defaults: Defaults,
    pub measure: MeasureSettings,
    pub dispense: DispenseConfig,
    pub purge: PurgeConfig,
}

impl RigConfig {
    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Read a configuration file, or start from defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(path)) => {
                info!(path = %path.display(), "configuration not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        text.push('\n');
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, text).map_err(io_err)?;
        info!(path = %path.display(), "saved configuration");
        Ok(())
    }

    /// Check tuning values that would make a procedure misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispense.validate()?;
        self.purge.validate()?;
        if !positive(self.defaults.timeout_secs) || !positive(self.defaults.ready_timeout_secs) {
            return Err(ConfigError::Invalid(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Session timing derived from the defaults.
    pub fn session_config(&self) -> SessionConfig {
        let timeout = secs(self.defaults.timeout_secs);
        SessionConfig {
            request_timeout: timeout,
            measure_timeout: timeout,
            ready_timeout: secs(self.defaults.ready_timeout_secs),
            ..SessionConfig::default()
        }
    }

    /// Same configuration with every settle delay removed.
    ///
    /// Used against the simulated rig, which settles instantly.
    pub fn without_settling(mut self) -> Self {
        self.dispense.scale_settle_secs = 0.0;
        self.dispense.tare_settle_secs = 0.0;
        self.dispense.stepper_settle_secs = 0.0;
        self.dispense.burst_settle_secs = 0.0;
        self.purge.settle_secs = 0.0;
        self.purge.scale_settle_secs = 0.0;
        self
    }

    pub fn filter(&self) -> FilterType {
        self.measure.filter
    }
}

pub(crate) fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Seconds as a `Duration`; negative or non-finite values become zero.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Block for `seconds` of settle time.
pub(crate) fn settle(seconds: f64) {
    let delay = secs(seconds);
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
