use std::fmt;
use std::time::Instant;

use powderdose_frame::Direction;
use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{positive, settle};
use crate::error::{ConfigError, ControlError, Result};
use crate::guard::PowerGuard;
use crate::log::{LogRow, LogSink};
use crate::measure::{measure_weight, MeasureSettings};
use crate::table::CalibrationTable;

/// Where a dispense (or purge) is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenseStage {
    Idle,
    Priming,
    CoarseFill,
    MediumFill,
    FineFill,
    Done,
    Purge,
}

impl fmt::Display for DispenseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Priming => "priming",
            Self::CoarseFill => "coarse fill",
            Self::MediumFill => "medium fill",
            Self::FineFill => "fine fill",
            Self::Done => "done",
            Self::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// Burst size of a fill stage and the fraction of the target it fills to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillStage {
    pub burst_steps: u32,
    pub threshold: f64,
}

/// Tuning for [`DispenseController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenseConfig {
    /// Share of the target delivered as one lump before the fill stages.
    pub initial_fraction: f64,
    pub coarse: FillStage,
    pub medium: FillStage,
    pub fine: FillStage,
    pub scale_settle_secs: f64,
    pub tare_settle_secs: f64,
    pub stepper_settle_secs: f64,
    /// Wait between a burst and its measurement.
    pub burst_settle_secs: f64,
    pub max_bursts_per_stage: u32,
    /// Wall-clock limit for a single fill stage.
    pub max_stage_secs: Option<f64>,
}

impl Default for DispenseConfig {
    fn default() -> Self {
        Self {
            initial_fraction: 0.5,
            coarse: FillStage {
                burst_steps: 400,
                threshold: 0.80,
            },
            medium: FillStage {
                burst_steps: 20,
                threshold: 0.97,
            },
            fine: FillStage {
                burst_steps: 5,
                threshold: 0.99,
            },
            scale_settle_secs: 1.0,
            tare_settle_secs: 1.0,
            stepper_settle_secs: 1.0,
            burst_settle_secs: 1.0,
            max_bursts_per_stage: 200,
            max_stage_secs: None,
        }
    }
}

impl DispenseConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(format!("dispense: {message}")));

        if !(self.initial_fraction.is_finite() && (0.0..1.0).contains(&self.initial_fraction)) {
            return invalid("initial_fraction must be in [0, 1)");
        }
        let stages = [self.coarse, self.medium, self.fine];
        if stages.iter().any(|stage| stage.burst_steps == 0) {
            return invalid("burst_steps must be positive");
        }
        if stages
            .iter()
            .any(|stage| !(positive(stage.threshold) && stage.threshold <= 1.0))
        {
            return invalid("thresholds must be in (0, 1]");
        }
        if stages
            .windows(2)
            .any(|pair| pair[0].threshold > pair[1].threshold)
        {
            return invalid("thresholds must not decrease from coarse to fine");
        }
        if self.max_bursts_per_stage == 0 {
            return invalid("max_bursts_per_stage must be positive");
        }
        let settles = [
            self.scale_settle_secs,
            self.tare_settle_secs,
            self.stepper_settle_secs,
            self.burst_settle_secs,
        ];
        if settles.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
            return invalid("settle times must be non-negative");
        }
        if let Some(limit) = self.max_stage_secs {
            if !positive(limit) {
                return invalid("max_stage_secs must be positive");
            }
        }
        Ok(())
    }

    fn fill_stages(&self) -> [(DispenseStage, FillStage); 3] {
        [
            (DispenseStage::CoarseFill, self.coarse),
            (DispenseStage::MediumFill, self.medium),
            (DispenseStage::FineFill, self.fine),
        ]
    }
}

/// What to dispense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseRequest {
    pub target_grams: f64,
    pub auger: String,
    pub powder: String,
    pub direction: Direction,
}

/// Progress of one dispense.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseSession {
    pub target: f64,
    pub measured: f64,
    pub stage: DispenseStage,
    pub total_steps: u64,
    pub bursts: u32,
}

impl DispenseSession {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            measured: 0.0,
            stage: DispenseStage::Idle,
            total_steps: 0,
            bursts: 0,
        }
    }

    fn enter(&mut self, stage: DispenseStage) {
        info!(from = %self.stage, to = %stage, measured = self.measured, "dispense stage");
        self.stage = stage;
    }
}

/// Work done in one fill stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: DispenseStage,
    pub bursts: u32,
    pub steps: u64,
    /// Weight at the end of the stage.
    pub measured: f64,
}

/// Result of a completed dispense.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseOutcome {
    pub target: f64,
    pub measured: f64,
    pub total_steps: u64,
    pub lump_steps: u32,
    pub stages: Vec<StageReport>,
}

/// Staged closed-loop dispensing.
///
/// A dispense tares the scale, delivers a lump sized from the calibrated
/// grams-per-step, then closes in on the target with progressively smaller
/// bursts, measuring after each. Every stage is bounded; the rig is powered
/// down however the dispense ends.
#[derive(Debug, Clone, Default)]
pub struct DispenseController {
    config: DispenseConfig,
    measure: MeasureSettings,
}

impl DispenseController {
    pub fn new(config: DispenseConfig, measure: MeasureSettings) -> Self {
        Self { config, measure }
    }

    pub fn config(&self) -> &DispenseConfig {
        &self.config
    }

    pub fn measure_settings(&self) -> &MeasureSettings {
        &self.measure
    }

    /// Dispense `request.target_grams` and log the outcome to `log`.
    ///
    /// The calibration lookup happens before any command is sent.
    pub fn dispense<L: SerialLink>(
        &self,
        device: &mut Device<L>,
        table: &CalibrationTable,
        request: &DispenseRequest,
        log: &mut dyn LogSink,
    ) -> Result<DispenseOutcome> {
        if !positive(request.target_grams) {
            return Err(ControlError::InvalidTarget(request.target_grams));
        }
        let factor = table.auger_factor(&request.auger, &request.powder)?;
        self.config.validate()?;

        info!(
            target = request.target_grams,
            auger = %request.auger,
            powder = %request.powder,
            grams_per_step = factor,
            "dispense started"
        );

        let mut run = DispenseSession::new(request.target_grams);
        let mut guard = PowerGuard::new(device);

        run.enter(DispenseStage::Priming);
        guard.scale_on(crate::config::secs(self.config.scale_settle_secs))?;
        guard.tare()?;
        settle(self.config.tare_settle_secs);
        run.measured = measure_weight(&mut *guard, &self.measure)?;
        guard.enable_stepper()?;
        settle(self.config.stepper_settle_secs);

        run.enter(DispenseStage::CoarseFill);
        let lump_steps = lump_steps(request.target_grams * self.config.initial_fraction, factor);
        if lump_steps > 0 {
            guard.dispense_steps(lump_steps, request.direction)?;
            run.total_steps += u64::from(lump_steps);
            settle(self.config.burst_settle_secs);
            run.measured = measure_weight(&mut *guard, &self.measure)?;
            debug!(steps = lump_steps, measured = run.measured, "initial lump");
        }

        let mut stages = Vec::with_capacity(3);
        for (stage, fill) in self.config.fill_stages() {
            stages.push(self.fill(&mut *guard, &mut run, stage, fill, request.direction)?);
        }

        run.enter(DispenseStage::Done);
        guard.release()?;

        info!(
            target = run.target,
            measured = run.measured,
            steps = run.total_steps,
            bursts = run.bursts,
            "dispense finished"
        );

        log.record(&LogRow {
            desired_amount: Some(run.target),
            measured_amount: Some(run.measured),
            steps: Some(run.total_steps),
            auger_type: Some(request.auger.clone()),
            powder_type: Some(request.powder.clone()),
            filter_type: Some(self.measure.filter.to_string()),
            ..LogRow::default()
        })
        .map_err(ControlError::Log)?;

        Ok(DispenseOutcome {
            target: run.target,
            measured: run.measured,
            total_steps: run.total_steps,
            lump_steps,
            stages,
        })
    }

    fn fill<L: SerialLink>(
        &self,
        device: &mut Device<L>,
        run: &mut DispenseSession,
        stage: DispenseStage,
        fill: FillStage,
        direction: Direction,
    ) -> Result<StageReport> {
        run.enter(stage);
        let goal = run.target * fill.threshold;
        let started = Instant::now();
        let limit = self.config.max_stage_secs.map(crate::config::secs);
        let mut bursts = 0;
        let mut steps = 0;

        while run.measured < goal {
            let timed_out = limit.is_some_and(|limit| started.elapsed() >= limit);
            if bursts >= self.config.max_bursts_per_stage || timed_out {
                warn!(%stage, bursts, measured = run.measured, goal, "dispense stalled");
                return Err(ControlError::ConvergenceStalled {
                    stage,
                    bursts,
                    measured: run.measured,
                    target: goal,
                });
            }
            device.dispense_steps(fill.burst_steps, direction)?;
            bursts += 1;
            steps += u64::from(fill.burst_steps);
            run.bursts += 1;
            run.total_steps += u64::from(fill.burst_steps);
            settle(self.config.burst_settle_secs);
            run.measured = measure_weight(device, &self.measure)?;
            debug!(%stage, bursts, measured = run.measured, goal, "burst");
        }

        Ok(StageReport {
            stage,
            bursts,
            steps,
            measured: run.measured,
        })
    }
}

/// Steps needed for `grams` at `grams_per_step`, rounded to the nearest step.
fn lump_steps(grams: f64, grams_per_step: f64) -> u32 {
    let steps = (grams / grams_per_step).round();
    if steps.is_finite() && steps > 0.0 {
        steps.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        DispenseConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_tuning() {
        let mut config = DispenseConfig::default();
        config.initial_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = DispenseConfig::default();
        config.medium.threshold = 0.5;
        assert!(config.validate().is_err());

        let mut config = DispenseConfig::default();
        config.fine.burst_steps = 0;
        assert!(config.validate().is_err());

        let mut config = DispenseConfig::default();
        config.burst_settle_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = DispenseConfig::default();
        config.max_stage_secs = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn lump_rounds_to_nearest_step() {
        assert_eq!(lump_steps(2.5, 0.01), 250);
        assert_eq!(lump_steps(0.004, 0.01), 0);
        assert_eq!(lump_steps(0.006, 0.01), 1);
        assert_eq!(lump_steps(1.0, 0.0), 0);
    }

    #[test]
    fn stage_names() {
        assert_eq!(DispenseStage::CoarseFill.to_string(), "coarse fill");
        assert_eq!(
            serde_json::to_value(DispenseStage::FineFill).unwrap(),
            "fine_fill"
        );
    }

    #[test]
    fn config_reads_partial_json() {
        let config: DispenseConfig =
            serde_json::from_str(r#"{"coarse": {"burst_steps": 300, "threshold": 0.75}}"#)
                .unwrap();
        assert_eq!(config.coarse.burst_steps, 300);
        assert_eq!(config.fine, DispenseConfig::default().fine);
    }
}
