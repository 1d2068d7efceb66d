use std::path::PathBuf;

use powderdose_control::{
    purge as run_purge, DispenseController, DispenseOutcome, DispenseRequest, LogSink, NullLog,
    PurgeOutcome,
};
use serde::Serialize;

use crate::cmd::{Context, DispenseArgs, PurgeArgs};
use crate::exit::{control_error, CliResult, SUCCESS};
use crate::output::{emit, grams, Render};

#[derive(Serialize)]
struct DispenseOutput {
    auger: String,
    powder: String,
    #[serde(flatten)]
    outcome: DispenseOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<PathBuf>,
}

impl Render for DispenseOutput {
    fn title(&self) -> &'static str {
        "dispense"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("auger", self.auger.clone()),
            ("powder", self.powder.clone()),
            ("target", grams(self.outcome.target)),
            ("measured", grams(self.outcome.measured)),
            ("error", grams(self.outcome.measured - self.outcome.target)),
            ("total steps", self.outcome.total_steps.to_string()),
            ("initial lump", self.outcome.lump_steps.to_string()),
        ];
        if let Some(log) = &self.log {
            fields.push(("log", log.display().to_string()));
        }
        fields
    }

    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        let rows = self
            .outcome
            .stages
            .iter()
            .map(|stage| {
                vec![
                    stage.stage.to_string(),
                    stage.bursts.to_string(),
                    stage.steps.to_string(),
                    grams(stage.measured),
                ]
            })
            .collect();
        Some((vec!["STAGE", "BURSTS", "STEPS", "MEASURED"], rows))
    }
}

pub fn run(args: DispenseArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let (auger, powder, direction) = args.powder.resolve(&config);
    let request = DispenseRequest {
        target_grams: args.grams,
        auger: auger.clone(),
        powder: powder.clone(),
        direction,
    };
    let controller = DispenseController::new(config.dispense.clone(), config.measure);

    let mut csv = if args.no_log {
        None
    } else {
        Some(ctx.dispense_log()?)
    };
    let log_path = csv.as_ref().map(|log| log.path().to_path_buf());
    let mut null = NullLog;
    let sink: &mut dyn LogSink = match csv.as_mut() {
        Some(log) => log,
        None => &mut null,
    };

    let mut device = ctx.connect(&config)?;
    let outcome = controller
        .dispense(&mut device, &config.calibration, &request, sink)
        .map_err(|err| control_error("dispense failed", err))?;

    emit(
        &DispenseOutput {
            auger,
            powder,
            outcome,
            log: log_path,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct PurgeOutput {
    #[serde(flatten)]
    outcome: PurgeOutcome,
}

impl Render for PurgeOutput {
    fn title(&self) -> &'static str {
        "purge"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("iterations", self.outcome.iterations.to_string()),
            ("total steps", self.outcome.total_steps.to_string()),
            ("purged", grams(self.outcome.final_weight)),
        ]
    }
}

pub fn purge(args: PurgeArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let direction = args
        .direction
        .unwrap_or(config.defaults.dispense_direction);

    let mut device = ctx.connect(&config)?;
    let outcome = run_purge(&mut device, &config.purge, &config.measure, direction)
        .map_err(|err| control_error("purge failed", err))?;

    emit(&PurgeOutput { outcome }, ctx.format);
    Ok(SUCCESS)
}
