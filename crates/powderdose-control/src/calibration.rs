//! Operator-gated calibration procedures.
//!
//! Both procedures are state machines. [`AugerCalibration::advance`] and
//! [`ScaleCalibration::advance`] run until the next point where a person has
//! to act, then return [`Progress::Awaiting`] with the prompt to show. The
//! caller feeds the operator's answer back into the next `advance`. The
//! [`run_auger_calibration`] and [`run_scale_calibration`] helpers do that
//! loop against an [`Operator`].

use std::fmt;
use std::time::Duration;

use powderdose_frame::Direction;
use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::positive;
use crate::error::{ConfigError, ControlError, Result};
use crate::log::{CalibrationRow, LogRow, LogSink};
use crate::measure::{average_raw, MeasureSettings};
use crate::regression::{fit_line, LinearFit};
use crate::table::{CalibrationTable, ScaleParams};

/// Something the operator has to do before the procedure can go on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "prompt", rename_all = "snake_case")]
pub enum Prompt {
    SetupScale,
    ClearPan,
    NextWeight,
    PlaceWeight { grams: f64 },
    MeasuredMass { steps: u32 },
    PlaceSample { repetition: u32, sample: u32 },
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupScale => f.write_str("Set up the scale, then continue"),
            Self::ClearPan => f.write_str("Remove everything from the pan, then continue"),
            Self::NextWeight => {
                f.write_str("Enter the next calibration weight in grams, or finish")
            }
            Self::PlaceWeight { grams } => {
                write!(f, "Place {grams} g on the pan, then continue")
            }
            Self::MeasuredMass { steps } => {
                write!(f, "Weigh the powder from {steps} steps and enter its mass in grams")
            }
            Self::PlaceSample { repetition, sample } => write!(
                f,
                "Place sample {sample} of repetition {repetition} on the pan, then continue"
            ),
        }
    }
}

/// The operator's answer to a [`Prompt`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorInput {
    Continue,
    /// Mass weighed off the rig, in grams.
    Mass(f64),
    /// Reference weight about to be placed, in grams.
    Weight(f64),
    /// No more weights.
    Finish,
    Abort,
}

impl fmt::Display for OperatorInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::Mass(grams) => write!(f, "mass {grams} g"),
            Self::Weight(grams) => write!(f, "weight {grams} g"),
            Self::Finish => f.write_str("finish"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress<T> {
    Awaiting(Prompt),
    Finished(T),
}

/// Answers prompts, usually by asking a person.
pub trait Operator {
    fn respond(&mut self, prompt: &Prompt) -> Result<OperatorInput>;
}

impl<F> Operator for F
where
    F: FnMut(&Prompt) -> Result<OperatorInput>,
{
    fn respond(&mut self, prompt: &Prompt) -> Result<OperatorInput> {
        self(prompt)
    }
}

/// Step counts to dispense while calibrating an auger.
#[derive(Debug, Clone, PartialEq)]
pub struct AugerPlan {
    pub auger: String,
    pub powder: String,
    pub direction: Direction,
    pub min_steps: u32,
    pub max_steps: u32,
    pub interval: u32,
}

impl AugerPlan {
    /// `min_steps..=max_steps` by `interval`.
    pub fn steps(&self) -> Result<Vec<u32>> {
        if self.interval == 0 || self.min_steps == 0 || self.min_steps > self.max_steps {
            return Err(ControlError::InvalidPlan(format!(
                "steps {}..={} by {} is not a usable range",
                self.min_steps, self.max_steps, self.interval
            )));
        }
        let steps: Vec<u32> = (self.min_steps..=self.max_steps)
            .step_by(self.interval as usize)
            .collect();
        if steps.len() < 2 {
            return Err(ControlError::InvalidPlan(
                "auger calibration needs at least two step counts".to_string(),
            ));
        }
        Ok(steps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AugerPoint {
    pub steps: u32,
    pub grams: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugerCalibrationReport {
    pub auger: String,
    pub powder: String,
    pub points: Vec<AugerPoint>,
    pub fit: LinearFit,
}

impl AugerCalibrationReport {
    /// The fitted slope; the intercept is discarded.
    pub fn grams_per_step(&self) -> f64 {
        self.fit.slope
    }

    /// Store the factor for this auger and powder.
    pub fn apply_to(&self, table: &mut CalibrationTable) -> std::result::Result<(), ConfigError> {
        let factor = self.grams_per_step();
        if !positive(factor) {
            return Err(ConfigError::InvalidFactor {
                auger: self.auger.clone(),
                powder: self.powder.clone(),
                factor,
            });
        }
        table.set_auger_factor(&self.auger, &self.powder, factor);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AugerState {
    Start,
    AwaitingMass(u32),
    Finished,
}

/// Fits grams per step for one auger and powder.
///
/// Start it with [`OperatorInput::Continue`]. Each step count is dispensed
/// in turn and the operator reports what it weighed.
#[derive(Debug)]
pub struct AugerCalibration {
    plan: AugerPlan,
    steps: Vec<u32>,
    next: usize,
    points: Vec<AugerPoint>,
    state: AugerState,
}

impl AugerCalibration {
    pub fn new(plan: AugerPlan) -> Result<Self> {
        let steps = plan.steps()?;
        Ok(Self {
            plan,
            steps,
            next: 0,
            points: Vec::new(),
            state: AugerState::Start,
        })
    }

    pub fn points(&self) -> &[AugerPoint] {
        &self.points
    }

    /// The prompt the calibration is waiting on, if any.
    pub fn prompt(&self) -> Option<Prompt> {
        match self.state {
            AugerState::AwaitingMass(steps) => Some(Prompt::MeasuredMass { steps }),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == AugerState::Finished
    }

    pub fn advance<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
        input: OperatorInput,
        log: &mut dyn LogSink,
    ) -> Result<Progress<AugerCalibrationReport>> {
        let result = self.step(device, input, log);
        if let Err(err) = &result {
            if !matches!(
                err,
                ControlError::UnexpectedInput { .. } | ControlError::AlreadyFinished
            ) {
                self.stop(device);
            }
        }
        result
    }

    /// Power down and give up.
    pub fn abort<L: SerialLink>(&mut self, device: &mut Device<L>) {
        if !self.is_finished() {
            self.stop(device);
        }
    }

    fn step<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
        input: OperatorInput,
        log: &mut dyn LogSink,
    ) -> Result<Progress<AugerCalibrationReport>> {
        match (self.state, input) {
            (AugerState::Finished, _) => Err(ControlError::AlreadyFinished),
            (_, OperatorInput::Abort) => {
                info!("auger calibration aborted");
                Err(ControlError::Aborted)
            }
            (AugerState::Start, OperatorInput::Continue) => {
                info!(
                    auger = %self.plan.auger,
                    powder = %self.plan.powder,
                    points = self.steps.len(),
                    "auger calibration started"
                );
                device.enable_stepper()?;
                self.dispense_next(device)
            }
            (AugerState::AwaitingMass(steps), OperatorInput::Mass(grams))
                if grams.is_finite() && grams >= 0.0 =>
            {
                self.points.push(AugerPoint { steps, grams });
                info!(steps, grams, "auger calibration point");
                log.record(&LogRow {
                    measured_amount: Some(grams),
                    steps: Some(u64::from(steps)),
                    auger_type: Some(self.plan.auger.clone()),
                    powder_type: Some(self.plan.powder.clone()),
                    ..LogRow::default()
                })
                .map_err(ControlError::Log)?;
                if self.next < self.steps.len() {
                    self.dispense_next(device)
                } else {
                    self.finish(device)
                }
            }
            (_, input) => Err(ControlError::UnexpectedInput {
                prompt: self
                    .prompt()
                    .map_or_else(|| "start".to_string(), |prompt| prompt.to_string()),
                input: input.to_string(),
            }),
        }
    }

    fn dispense_next<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
    ) -> Result<Progress<AugerCalibrationReport>> {
        let steps = self.steps[self.next];
        self.next += 1;
        device.dispense_steps(steps, self.plan.direction)?;
        self.state = AugerState::AwaitingMass(steps);
        Ok(Progress::Awaiting(Prompt::MeasuredMass { steps }))
    }

    fn finish<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
    ) -> Result<Progress<AugerCalibrationReport>> {
        self.state = AugerState::Finished;
        device.disable_stepper()?;
        let points: Vec<(f64, f64)> = self
            .points
            .iter()
            .map(|point| (f64::from(point.steps), point.grams))
            .collect();
        let fit = fit_line(&points)?;
        info!(
            grams_per_step = fit.slope,
            r_squared = fit.r_squared,
            "auger calibration finished"
        );
        Ok(Progress::Finished(AugerCalibrationReport {
            auger: self.plan.auger.clone(),
            powder: self.plan.powder.clone(),
            points: self.points.clone(),
            fit,
        }))
    }

    fn stop<L: SerialLink>(&mut self, device: &mut Device<L>) {
        self.state = AugerState::Finished;
        if let Err(err) = device.power_down() {
            warn!(error = %err, "power-down after auger calibration failed");
        }
    }
}

/// How to calibrate the load cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePlan {
    /// Reference weights to use in order, or `None` to ask for each one.
    pub known_weights: Option<Vec<f64>>,
    /// Raw readings averaged per point.
    pub num_meas: u32,
    pub measure: MeasureSettings,
    /// Wait after powering the scale.
    pub settle: Duration,
}

impl ScalePlan {
    fn validate(&self) -> Result<()> {
        if let Some(weights) = &self.known_weights {
            if weights.is_empty() {
                return Err(ControlError::InvalidPlan(
                    "no calibration weights given".to_string(),
                ));
            }
            if let Some(bad) = weights.iter().find(|w| !positive(**w)) {
                return Err(ControlError::InvalidPlan(format!(
                    "calibration weight {bad} g must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalePoint {
    pub grams: f64,
    pub raw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleCalibrationReport {
    pub points: Vec<ScalePoint>,
    /// `raw = slope·grams + intercept`.
    pub fit: LinearFit,
}

impl ScaleCalibrationReport {
    pub fn params(&self) -> ScaleParams {
        ScaleParams {
            slope: self.fit.slope,
            intercept: self.fit.intercept,
        }
    }

    pub fn apply_to(&self, table: &mut CalibrationTable) -> std::result::Result<(), ConfigError> {
        let params = self.params();
        if !params.slope.is_finite() || params.slope == 0.0 || !params.intercept.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "scale slope {} cannot convert readings to grams",
                params.slope
            )));
        }
        table.scale = params;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScaleState {
    Start,
    Setup,
    ClearPan,
    NextWeight,
    PlaceWeight(f64),
    Finished,
}

/// Fits the load cell's raw reading against reference weights.
///
/// Start it with [`OperatorInput::Continue`]. Every weight is bracketed by
/// an empty-pan reading.
#[derive(Debug)]
pub struct ScaleCalibration {
    plan: ScalePlan,
    next_weight: usize,
    points: Vec<ScalePoint>,
    state: ScaleState,
}

impl ScaleCalibration {
    pub fn new(plan: ScalePlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self {
            plan,
            next_weight: 0,
            points: Vec::new(),
            state: ScaleState::Start,
        })
    }

    pub fn points(&self) -> &[ScalePoint] {
        &self.points
    }

    pub fn prompt(&self) -> Option<Prompt> {
        match self.state {
            ScaleState::Setup => Some(Prompt::SetupScale),
            ScaleState::ClearPan => Some(Prompt::ClearPan),
            ScaleState::NextWeight => Some(Prompt::NextWeight),
            ScaleState::PlaceWeight(grams) => Some(Prompt::PlaceWeight { grams }),
            ScaleState::Start | ScaleState::Finished => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ScaleState::Finished
    }

    pub fn advance<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
        input: OperatorInput,
        log: &mut dyn LogSink,
    ) -> Result<Progress<ScaleCalibrationReport>> {
        let result = self.step(device, input, log);
        if let Err(err) = &result {
            if !matches!(
                err,
                ControlError::UnexpectedInput { .. } | ControlError::AlreadyFinished
            ) {
                self.stop(device);
            }
        }
        result
    }

    pub fn abort<L: SerialLink>(&mut self, device: &mut Device<L>) {
        if !self.is_finished() {
            self.stop(device);
        }
    }

    fn step<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
        input: OperatorInput,
        log: &mut dyn LogSink,
    ) -> Result<Progress<ScaleCalibrationReport>> {
        match (self.state, input) {
            (ScaleState::Finished, _) => Err(ControlError::AlreadyFinished),
            (_, OperatorInput::Abort) => {
                info!("scale calibration aborted");
                Err(ControlError::Aborted)
            }
            (ScaleState::Start, OperatorInput::Continue) => {
                info!("scale calibration started");
                device.enable_stepper()?;
                device.scale_on(self.plan.settle)?;
                self.await_prompt(ScaleState::Setup)
            }
            (ScaleState::Setup, OperatorInput::Continue) => self.await_prompt(ScaleState::ClearPan),
            (ScaleState::ClearPan, OperatorInput::Continue) => {
                self.record(device, 0.0)?;
                match self.listed_weight() {
                    Some(grams) => self.await_prompt(ScaleState::PlaceWeight(grams)),
                    None => self.await_prompt(ScaleState::NextWeight),
                }
            }
            (ScaleState::NextWeight, OperatorInput::Weight(grams)) if positive(grams) => {
                self.await_prompt(ScaleState::PlaceWeight(grams))
            }
            (ScaleState::NextWeight, OperatorInput::Finish) => self.finish(device, log),
            (ScaleState::PlaceWeight(grams), OperatorInput::Continue) => {
                self.record(device, grams)?;
                if self.plan.known_weights.is_some() {
                    self.next_weight += 1;
                    if self.listed_weight().is_none() {
                        return self.finish(device, log);
                    }
                }
                self.await_prompt(ScaleState::ClearPan)
            }
            (_, input) => Err(ControlError::UnexpectedInput {
                prompt: self
                    .prompt()
                    .map_or_else(|| "start".to_string(), |prompt| prompt.to_string()),
                input: input.to_string(),
            }),
        }
    }

    fn listed_weight(&self) -> Option<f64> {
        self.plan
            .known_weights
            .as_ref()
            .and_then(|weights| weights.get(self.next_weight).copied())
    }

    fn await_prompt(&mut self, state: ScaleState) -> Result<Progress<ScaleCalibrationReport>> {
        self.state = state;
        match self.prompt() {
            Some(prompt) => Ok(Progress::Awaiting(prompt)),
            None => Err(ControlError::InvalidPlan(
                "calibration has nothing to wait for".to_string(),
            )),
        }
    }

    fn record<L: SerialLink>(&mut self, device: &mut Device<L>, grams: f64) -> Result<()> {
        let raw = average_raw(device, self.plan.num_meas, &self.plan.measure)?;
        info!(grams, raw, "scale calibration point");
        self.points.push(ScalePoint { grams, raw });
        Ok(())
    }

    fn finish<L: SerialLink>(
        &mut self,
        device: &mut Device<L>,
        log: &mut dyn LogSink,
    ) -> Result<Progress<ScaleCalibrationReport>> {
        self.state = ScaleState::Finished;
        device.power_down()?;
        let points: Vec<(f64, f64)> = self
            .points
            .iter()
            .map(|point| (point.grams, point.raw))
            .collect();
        let fit = fit_line(&points)?;
        info!(
            slope = fit.slope,
            intercept = fit.intercept,
            r_squared = fit.r_squared,
            "scale calibration finished"
        );
        log.record_calibration(&CalibrationRow {
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            points: self.points.len(),
        })
        .map_err(ControlError::Log)?;
        Ok(Progress::Finished(ScaleCalibrationReport {
            points: self.points.clone(),
            fit,
        }))
    }

    fn stop<L: SerialLink>(&mut self, device: &mut Device<L>) {
        self.state = ScaleState::Finished;
        if let Err(err) = device.power_down() {
            warn!(error = %err, "power-down after scale calibration failed");
        }
    }
}

/// Feed operator answers into `step` until it finishes.
///
/// Answers of the wrong kind are logged and the same prompt is asked again.
/// If the operator itself fails, the procedure is aborted first.
fn drive<T>(
    operator: &mut dyn Operator,
    mut step: impl FnMut(OperatorInput) -> Result<Progress<T>>,
) -> Result<T> {
    let mut input = OperatorInput::Continue;
    let mut pending: Option<Prompt> = None;
    loop {
        let prompt = match step(input) {
            Ok(Progress::Finished(report)) => return Ok(report),
            Ok(Progress::Awaiting(prompt)) => prompt,
            Err(ControlError::UnexpectedInput { prompt, input }) if pending.is_some() => {
                warn!(%prompt, %input, "ignoring unexpected answer");
                match pending.take() {
                    Some(prompt) => prompt,
                    None => return Err(ControlError::Aborted),
                }
            }
            Err(err) => return Err(err),
        };
        input = match operator.respond(&prompt) {
            Ok(input) => input,
            Err(err) => {
                match step(OperatorInput::Abort) {
                    Err(ControlError::Aborted) => {}
                    Err(abort_err) => {
                        warn!(error = %abort_err, "abort after operator failure failed");
                    }
                    Ok(_) => warn!("calibration kept running after abort"),
                }
                return Err(err);
            }
        };
        pending = Some(prompt);
    }
}

/// Calibrate an auger with `operator` answering every prompt.
pub fn run_auger_calibration<L: SerialLink>(
    device: &mut Device<L>,
    plan: AugerPlan,
    operator: &mut dyn Operator,
    log: &mut dyn LogSink,
) -> Result<AugerCalibrationReport> {
    let mut calibration = AugerCalibration::new(plan)?;
    drive(operator, |input| calibration.advance(device, input, log))
}

/// Calibrate the scale with `operator` answering every prompt.
///
/// The fitted line is written to `log` as a calibration row.
pub fn run_scale_calibration<L: SerialLink>(
    device: &mut Device<L>,
    plan: ScalePlan,
    operator: &mut dyn Operator,
    log: &mut dyn LogSink,
) -> Result<ScaleCalibrationReport> {
    let mut calibration = ScaleCalibration::new(plan)?;
    drive(operator, |input| calibration.advance(device, input, log))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(min: u32, max: u32, interval: u32) -> AugerPlan {
        AugerPlan {
            auger: "8mm_base".to_string(),
            powder: "dishwasher_salt".to_string(),
            direction: Direction::Forward,
            min_steps: min,
            max_steps: max,
            interval,
        }
    }

    #[test]
    fn step_range_is_inclusive() {
        assert_eq!(plan(100, 500, 200).steps().unwrap(), vec![100, 300, 500]);
        assert_eq!(plan(100, 550, 200).steps().unwrap(), vec![100, 300, 500]);
    }

    #[test]
    fn unusable_step_ranges() {
        assert!(plan(100, 100, 10).steps().is_err());
        assert!(plan(100, 50, 10).steps().is_err());
        assert!(plan(100, 500, 0).steps().is_err());
        assert!(plan(0, 500, 100).steps().is_err());
    }

    #[test]
    fn scale_plan_rejects_empty_list() {
        let plan = ScalePlan {
            known_weights: Some(Vec::new()),
            num_meas: 1,
            measure: MeasureSettings::default(),
            settle: Duration::ZERO,
        };
        assert!(matches!(
            ScaleCalibration::new(plan),
            Err(ControlError::InvalidPlan(_))
        ));
    }

    #[test]
    fn prompts_read_naturally() {
        assert_eq!(
            Prompt::PlaceWeight { grams: 5.0 }.to_string(),
            "Place 5 g on the pan, then continue"
        );
        assert_eq!(OperatorInput::Mass(1.25).to_string(), "mass 1.25 g");
    }

    #[test]
    fn report_rejects_non_positive_factor() {
        let report = AugerCalibrationReport {
            auger: "a".to_string(),
            powder: "p".to_string(),
            points: Vec::new(),
            fit: LinearFit {
                slope: -0.01,
                intercept: 0.0,
                r_squared: 1.0,
            },
        };
        let mut table = CalibrationTable::default();
        assert!(report.apply_to(&mut table).is_err());
        assert!(table.augers.is_empty());
    }
}
