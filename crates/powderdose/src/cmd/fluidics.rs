use powderdose_control::{
    reset as reset_chamber, run_drain, run_flush, run_mixer, run_pump, PumpAmount, ResetPlan,
    FLUSH_PUMP,
};
use serde::Serialize;

use crate::cmd::{positive_or_usage, Context, FlushArgs, PumpArgs, ResetArgs, TimedArgs};
use crate::exit::{control_error, CliResult, SUCCESS};
use crate::output::{emit, Render};

#[derive(Serialize)]
struct Actuation {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    /// `None` when there was nothing to run.
    seconds: Option<f64>,
}

impl Render for Actuation {
    fn title(&self) -> &'static str {
        self.action
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(target) = &self.target {
            fields.push(("target", target.clone()));
        }
        let seconds = match self.seconds {
            Some(seconds) => format!("{seconds:.2} s"),
            None => "skipped".to_string(),
        };
        fields.push(("run time", seconds));
        fields
    }
}

pub fn mix(args: TimedArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let seconds = positive_or_usage("mix time", args.seconds.unwrap_or(config.defaults.mix_secs))?;
    let mut device = ctx.connect(&config)?;
    run_mixer(&mut device, seconds).map_err(|err| control_error("mix failed", err))?;
    emit(
        &Actuation {
            action: "mix",
            target: None,
            seconds: Some(seconds),
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

pub fn drain(args: TimedArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let seconds = positive_or_usage(
        "drain time",
        args.seconds.unwrap_or(config.defaults.drain_secs),
    )?;
    let mut device = ctx.connect(&config)?;
    run_drain(&mut device, seconds).map_err(|err| control_error("drain failed", err))?;
    emit(
        &Actuation {
            action: "drain",
            target: None,
            seconds: Some(seconds),
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

pub fn pump(args: PumpArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let amount = match (args.volume, args.seconds) {
        (Some(volume), _) => PumpAmount::Volume(volume),
        (None, Some(seconds)) => PumpAmount::Seconds(seconds),
        (None, None) => PumpAmount::Seconds(0.0),
    };
    // Fail on an uncalibrated pump before opening the port.
    config
        .calibration
        .pump(&args.id)
        .map_err(|err| control_error("pump failed", err.into()))?;

    let mut device = ctx.connect(&config)?;
    let seconds = run_pump(&mut device, &config.calibration, &args.id, amount)
        .map_err(|err| control_error("pump failed", err))?;
    emit(
        &Actuation {
            action: "pump",
            target: Some(args.id),
            seconds,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

pub fn flush(args: FlushArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let amount = match (args.volume, args.seconds) {
        (_, Some(seconds)) => PumpAmount::Seconds(seconds),
        (Some(volume), None) => PumpAmount::Volume(volume),
        (None, None) => PumpAmount::Volume(config.defaults.flush_volume),
    };
    config
        .calibration
        .pump(FLUSH_PUMP)
        .map_err(|err| control_error("flush failed", err.into()))?;

    let mut device = ctx.connect(&config)?;
    let seconds = run_flush(&mut device, &config.calibration, amount)
        .map_err(|err| control_error("flush failed", err))?;
    emit(
        &Actuation {
            action: "flush",
            target: Some(FLUSH_PUMP.to_string()),
            seconds,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

pub fn reset(args: ResetArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let plan = ResetPlan {
        drain_secs: args.drain_secs.unwrap_or(config.defaults.drain_secs),
        flush_secs: args.flush_secs.unwrap_or(config.defaults.flush_secs),
        pause: ctx.pause(ResetPlan::default().pause),
    };
    config
        .calibration
        .pump(FLUSH_PUMP)
        .map_err(|err| control_error("reset failed", err.into()))?;

    let mut device = ctx.connect(&config)?;
    reset_chamber(&mut device, &config.calibration, &plan)
        .map_err(|err| control_error("reset failed", err))?;
    emit(
        &Actuation {
            action: "reset",
            target: None,
            seconds: Some(2.0 * plan.drain_secs + plan.flush_secs),
        },
        ctx.format,
    );
    Ok(SUCCESS)
}
