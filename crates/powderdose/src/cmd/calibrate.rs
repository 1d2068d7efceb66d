use powderdose_control::{
    run_auger_calibration, run_scale_calibration, AugerCalibrationReport, AugerPlan,
    ScaleCalibrationReport, ScalePlan,
};
use serde::Serialize;

use crate::cmd::{CalibrateAugerArgs, CalibrateScaleArgs, Context};
use crate::exit::{control_error, CliResult, SUCCESS};
use crate::operator::TerminalOperator;
use crate::output::{emit, grams, Render};

#[derive(Serialize)]
struct AugerOutput {
    #[serde(flatten)]
    report: AugerCalibrationReport,
    grams_per_step: f64,
    saved_to: String,
}

impl Render for AugerOutput {
    fn title(&self) -> &'static str {
        "auger calibration"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("auger", self.report.auger.clone()),
            ("powder", self.report.powder.clone()),
            ("grams per step", format!("{:.6}", self.grams_per_step)),
            ("intercept", grams(self.report.fit.intercept)),
            ("r squared", format!("{:.4}", self.report.fit.r_squared)),
            ("saved to", self.saved_to.clone()),
        ]
    }

    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        let rows = self
            .report
            .points
            .iter()
            .map(|point| vec![point.steps.to_string(), grams(point.grams)])
            .collect();
        Some((vec!["STEPS", "MASS"], rows))
    }
}

pub fn auger(args: CalibrateAugerArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let (auger, powder, direction) = args.powder.resolve(&config);
    let plan = AugerPlan {
        auger,
        powder,
        direction,
        min_steps: args.min_steps,
        max_steps: args.max_steps,
        interval: args.interval,
    };
    // Reject a bad step range before the rig is touched.
    plan.steps().map_err(|err| control_error("invalid calibration plan", err))?;

    let mut log = ctx.dispense_log()?;
    let mut operator = TerminalOperator::stdio();
    let mut device = ctx.connect(&config)?;
    let report = run_auger_calibration(&mut device, plan, &mut operator, &mut log)
        .map_err(|err| control_error("auger calibration failed", err))?;

    ctx.save_calibration(|table| report.apply_to(table))?;
    emit(
        &AugerOutput {
            grams_per_step: report.grams_per_step(),
            report,
            saved_to: ctx.config_path.display().to_string(),
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct ScaleOutput {
    #[serde(flatten)]
    report: ScaleCalibrationReport,
    saved_to: String,
    log: String,
}

impl Render for ScaleOutput {
    fn title(&self) -> &'static str {
        "scale calibration"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let params = self.report.params();
        vec![
            ("slope", format!("{:.4}", params.slope)),
            ("intercept", format!("{:.1}", params.intercept)),
            ("r squared", format!("{:.4}", self.report.fit.r_squared)),
            ("saved to", self.saved_to.clone()),
            ("log", self.log.clone()),
        ]
    }

    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        let rows = self
            .report
            .points
            .iter()
            .map(|point| vec![grams(point.grams), format!("{:.1}", point.raw)])
            .collect();
        Some((vec!["MASS", "RAW"], rows))
    }
}

pub fn scale(args: CalibrateScaleArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let known_weights = if args.known_weights {
        Some(config.calibration.known_weights())
    } else {
        args.weights
    };
    let plan = ScalePlan {
        known_weights,
        num_meas: args.num_meas.unwrap_or(config.defaults.num_meas),
        measure: config.measure,
        settle: ctx.settle(config.dispense.scale_settle_secs),
    };

    let mut log = ctx.dispense_log()?;
    let mut operator = TerminalOperator::stdio();
    let mut device = ctx.connect(&config)?;
    let report = run_scale_calibration(&mut device, plan, &mut operator, &mut log)
        .map_err(|err| control_error("scale calibration failed", err))?;

    ctx.save_calibration(|table| report.apply_to(table))?;
    emit(
        &ScaleOutput {
            report,
            saved_to: ctx.config_path.display().to_string(),
            log: log.calibration_path().display().to_string(),
        },
        ctx.format,
    );
    Ok(SUCCESS)
}
