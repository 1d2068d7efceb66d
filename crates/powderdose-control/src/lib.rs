//! Closed-loop dispensing and calibration.
//!
//! Everything here drives a [`powderdose_session::Device`]:
//! - [`DispenseController`] converges on a target mass in staged bursts
//! - [`purge`] empties the auger until the scale stops changing
//! - [`AugerCalibration`] and [`ScaleCalibration`] fit the factors the
//!   controller depends on, pausing at every operator gate
//!
//! Calibration factors and tuning live in a JSON [`RigConfig`].

pub mod calibration;
pub mod config;
pub mod dispense;
pub mod error;
pub mod fluidics;
pub mod guard;
pub mod log;
pub mod measure;
pub mod purge;
pub mod regression;
pub mod sensitivity;
pub mod table;

pub use calibration::{
    run_auger_calibration, run_scale_calibration, AugerCalibration, AugerCalibrationReport,
    AugerPlan, AugerPoint, Operator, OperatorInput, Progress, Prompt, ScaleCalibration,
    ScaleCalibrationReport, ScalePlan, ScalePoint,
};
pub use config::{Defaults, RigConfig, DEFAULT_CONFIG_FILE};
pub use dispense::{
    DispenseConfig, DispenseController, DispenseOutcome, DispenseRequest, DispenseSession,
    DispenseStage, FillStage, StageReport,
};
pub use error::{ConfigError, ControlError, Result};
pub use fluidics::{
    pump_seconds, reset, run_drain, run_flush, run_mixer, run_pump, PumpAmount, ResetPlan,
    FLUSH_PUMP,
};
pub use guard::PowerGuard;
pub use log::{CalibrationRow, LogRow, LogSink, MemoryLog, NullLog};
pub use measure::{average_raw, measure_weight, MeasureSettings};
pub use purge::{purge, PurgeConfig, PurgeOutcome};
pub use regression::{fit_line, FitError, LinearFit};
pub use sensitivity::{
    run_sensitivity, SampleSource, SensitivityPlan, SensitivityReport, SensitivitySample,
};
pub use table::{CalibrationTable, CalibrationWeight, PumpCalibration, ScaleParams};
