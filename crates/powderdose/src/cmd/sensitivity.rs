use powderdose_control::{
    run_sensitivity, DispenseController, DispenseRequest, SampleSource, SensitivityPlan,
    SensitivityReport,
};
use serde::Serialize;

use crate::cmd::{Context, SensitivityArgs};
use crate::exit::{control_error, CliResult, SUCCESS};
use crate::operator::TerminalOperator;
use crate::output::{emit, grams, Render};

#[derive(Serialize)]
struct SensitivityOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<f64>,
    #[serde(flatten)]
    report: SensitivityReport,
}

impl Render for SensitivityOutput {
    fn title(&self) -> &'static str {
        "sensitivity"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(target) = self.target {
            fields.push(("target", grams(target)));
        }
        fields.push(("samples", self.report.samples.len().to_string()));
        fields.push(("mean", grams(self.report.mean)));
        fields.push(("std dev", grams(self.report.std_dev)));
        fields
    }

    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        let rows = self
            .report
            .samples
            .iter()
            .map(|sample| {
                vec![
                    sample.repetition.to_string(),
                    sample.sample.to_string(),
                    grams(sample.grams),
                ]
            })
            .collect();
        Some((vec!["REP", "SAMPLE", "MASS"], rows))
    }
}

pub fn run(args: SensitivityArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let source = match args.target {
        Some(target_grams) => {
            let (auger, powder, direction) = args.powder.resolve(&config);
            SampleSource::Dispense(DispenseRequest {
                target_grams,
                auger,
                powder,
                direction,
            })
        }
        None => SampleSource::Operator,
    };
    let plan = SensitivityPlan {
        reps: args.reps.unwrap_or(config.defaults.reps),
        samples: args.samples.unwrap_or(config.defaults.samples),
        source,
        scale_settle: ctx.settle(config.dispense.scale_settle_secs),
    };
    let controller = DispenseController::new(config.dispense.clone(), config.measure);

    let mut log = ctx.dispense_log()?;
    let mut operator = TerminalOperator::stdio();
    let mut device = ctx.connect(&config)?;
    let report = run_sensitivity(
        &mut device,
        &config.calibration,
        &controller,
        &plan,
        &mut operator,
        &mut log,
    )
    .map_err(|err| control_error("sensitivity test failed", err))?;

    emit(
        &SensitivityOutput {
            target: args.target,
            report,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}
