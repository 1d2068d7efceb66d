use std::time::Duration;

use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::Serialize;
use tracing::{info, warn};

use crate::calibration::{Operator, OperatorInput, Prompt};
use crate::dispense::{DispenseController, DispenseRequest};
use crate::error::{ControlError, Result};
use crate::guard::PowerGuard;
use crate::log::{LogRow, LogSink, NullLog};
use crate::measure::measure_weight;
use crate::table::CalibrationTable;

/// Where each weighed sample comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSource {
    /// The operator places every sample by hand.
    Operator,
    /// The dispense controller produces every sample.
    Dispense(DispenseRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityPlan {
    pub reps: u32,
    pub samples: u32,
    pub source: SampleSource,
    /// Wait after powering the scale.
    pub scale_settle: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensitivitySample {
    pub repetition: u32,
    pub sample: u32,
    pub grams: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityReport {
    pub samples: Vec<SensitivitySample>,
    pub mean: f64,
    /// Sample standard deviation; zero with fewer than two samples.
    pub std_dev: f64,
}

impl SensitivityReport {
    fn from_samples(samples: Vec<SensitivitySample>) -> Self {
        let n = samples.len() as f64;
        let mean = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.grams).sum::<f64>() / n
        };
        let std_dev = if samples.len() < 2 {
            0.0
        } else {
            let ss: f64 = samples.iter().map(|s| (s.grams - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        };
        Self {
            samples,
            mean,
            std_dev,
        }
    }
}

/// Weigh `reps × samples` samples and log each one.
pub fn run_sensitivity<L: SerialLink>(
    device: &mut Device<L>,
    table: &CalibrationTable,
    controller: &DispenseController,
    plan: &SensitivityPlan,
    operator: &mut dyn Operator,
    log: &mut dyn LogSink,
) -> Result<SensitivityReport> {
    if plan.reps == 0 || plan.samples == 0 {
        return Err(ControlError::InvalidPlan(
            "sensitivity test needs at least one repetition and sample".to_string(),
        ));
    }
    info!(reps = plan.reps, samples = plan.samples, "sensitivity test started");

    let samples = match &plan.source {
        SampleSource::Operator => weigh_placed(device, controller, plan, operator, log)?,
        SampleSource::Dispense(request) => {
            weigh_dispensed(device, table, controller, plan, request, log)?
        }
    };

    let report = SensitivityReport::from_samples(samples);
    info!(
        mean = report.mean,
        std_dev = report.std_dev,
        "sensitivity test finished"
    );
    Ok(report)
}

fn weigh_placed<L: SerialLink>(
    device: &mut Device<L>,
    controller: &DispenseController,
    plan: &SensitivityPlan,
    operator: &mut dyn Operator,
    log: &mut dyn LogSink,
) -> Result<Vec<SensitivitySample>> {
    let measure = controller.measure_settings();
    let mut guard = PowerGuard::new(device);
    guard.enable_stepper()?;
    guard.scale_on(plan.scale_settle)?;

    let mut samples = Vec::new();
    for repetition in 1..=plan.reps {
        guard.tare()?;
        for sample in 1..=plan.samples {
            let prompt = Prompt::PlaceSample { repetition, sample };
            loop {
                match operator.respond(&prompt)? {
                    OperatorInput::Continue => break,
                    OperatorInput::Abort => return Err(ControlError::Aborted),
                    other => {
                        warn!(%prompt, input = %other, "ignoring unexpected answer");
                    }
                }
            }
            let grams = measure_weight(&mut *guard, measure)?;
            record(log, repetition, sample, None, grams, None)?;
            samples.push(SensitivitySample {
                repetition,
                sample,
                grams,
            });
        }
    }
    guard.release()?;
    Ok(samples)
}

fn weigh_dispensed<L: SerialLink>(
    device: &mut Device<L>,
    table: &CalibrationTable,
    controller: &DispenseController,
    plan: &SensitivityPlan,
    request: &DispenseRequest,
    log: &mut dyn LogSink,
) -> Result<Vec<SensitivitySample>> {
    let mut samples = Vec::new();
    for repetition in 1..=plan.reps {
        for sample in 1..=plan.samples {
            let outcome = controller.dispense(device, table, request, &mut NullLog)?;
            record(
                log,
                repetition,
                sample,
                Some(request),
                outcome.measured,
                Some(outcome.total_steps),
            )?;
            samples.push(SensitivitySample {
                repetition,
                sample,
                grams: outcome.measured,
            });
        }
    }
    Ok(samples)
}

fn record(
    log: &mut dyn LogSink,
    repetition: u32,
    sample: u32,
    request: Option<&DispenseRequest>,
    grams: f64,
    steps: Option<u64>,
) -> Result<()> {
    info!(repetition, sample, grams, "sensitivity sample");
    log.record(&LogRow {
        desired_amount: request.map(|r| r.target_grams),
        measured_amount: Some(grams),
        steps,
        auger_type: request.map(|r| r.auger.clone()),
        powder_type: request.map(|r| r.powder.clone()),
        repetition: Some(repetition),
        sample: Some(sample),
        ..LogRow::default()
    })
    .map_err(ControlError::Log)
}
