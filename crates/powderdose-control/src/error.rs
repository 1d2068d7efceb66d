use std::path::PathBuf;

use powderdose_session::SessionError;

use crate::dispense::DispenseStage;
use crate::regression::FitError;

/// Errors loading, saving or looking up rig configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read or written.
    #[error("configuration I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("invalid configuration in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// No grams-per-step factor for this auger and powder.
    #[error("no calibration for auger {auger:?} with powder {powder:?}")]
    MissingAuger { auger: String, powder: String },

    /// No calibration for this pump.
    #[error("no calibration for pump {0:?}")]
    MissingPump(String),

    /// A stored grams-per-step factor cannot drive the auger.
    #[error("calibration factor {factor} for auger {auger:?} with powder {powder:?} must be positive")]
    InvalidFactor {
        auger: String,
        powder: String,
        factor: f64,
    },

    /// A tuning value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from dispensing, purging and calibration.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Session-level error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The calibration data could not be fitted.
    #[error("calibration fit failed: {0}")]
    Fit(#[from] FitError),

    /// The scale stopped approaching the stage threshold.
    #[error(
        "{stage} stalled after {bursts} bursts: measured {measured:.3} g, target {target:.3} g"
    )]
    ConvergenceStalled {
        stage: DispenseStage,
        bursts: u32,
        measured: f64,
        target: f64,
    },

    /// The requested mass cannot be dispensed.
    #[error("invalid target mass {0} g")]
    InvalidTarget(f64),

    /// A calibration or test plan is inconsistent.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The operator answered a prompt with the wrong kind of input.
    #[error("unexpected input {input} at prompt: {prompt}")]
    UnexpectedInput { prompt: String, input: String },

    /// A calibration that has already finished was advanced again.
    #[error("calibration already finished")]
    AlreadyFinished,

    /// The operator aborted the procedure.
    #[error("aborted by operator")]
    Aborted,

    /// A dispense log row could not be written.
    #[error("failed to write dispense log: {0}")]
    Log(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
