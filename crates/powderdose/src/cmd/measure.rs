use powderdose_control::{average_raw, measure_weight, MeasureSettings, PowerGuard};
use serde::Serialize;

use crate::cmd::{Context, MeasureArgs};
use crate::exit::{control_error, session_error, CliResult, SUCCESS};
use crate::output::{emit, grams, Render};

#[derive(Serialize)]
struct Reading {
    unit: &'static str,
    value: f64,
    /// Raw readings converted through the stored scale calibration.
    #[serde(skip_serializing_if = "Option::is_none")]
    grams: Option<f64>,
    samples: u32,
    filter: String,
    tared: bool,
}

impl Render for Reading {
    fn title(&self) -> &'static str {
        "measurement"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let value = match self.unit {
            "g" => grams(self.value),
            _ => format!("{:.1}", self.value),
        };
        let mut fields = vec![("value", value)];
        if let Some(converted) = self.grams {
            fields.push(("grams", grams(converted)));
        }
        fields.extend([
            ("samples", self.samples.to_string()),
            ("filter", self.filter.clone()),
            ("tared", self.tared.to_string()),
        ]);
        fields
    }
}

pub fn run(args: MeasureArgs, ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let settings = MeasureSettings {
        samples: args.samples.unwrap_or(config.measure.samples),
        filter: args.filter.unwrap_or(config.measure.filter),
        ..config.measure
    };

    let mut device = ctx.connect(&config)?;
    let mut guard = PowerGuard::new(&mut device);
    guard
        .scale_on(ctx.settle(config.dispense.scale_settle_secs))
        .map_err(|err| session_error("scale on failed", err))?;
    if args.tare {
        guard.tare().map_err(|err| session_error("tare failed", err))?;
        std::thread::sleep(ctx.settle(config.dispense.tare_settle_secs));
    }
    let (unit, value) = if args.raw {
        ("raw", average_raw(&mut *guard, 1, &settings))
    } else {
        ("g", measure_weight(&mut *guard, &settings))
    };
    let value = value.map_err(|err| control_error("measurement failed", err))?;
    let converted = args
        .raw
        .then(|| config.calibration.scale.grams_from_raw(value));
    guard
        .release()
        .map_err(|err| control_error("power down failed", err))?;

    emit(
        &Reading {
            unit,
            value,
            grams: converted,
            samples: settings.samples,
            filter: settings.filter.to_string(),
            tared: args.tare,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}

pub fn tare(ctx: &Context) -> CliResult<i32> {
    let config = ctx.load_config()?;
    let mut device = ctx.connect(&config)?;
    let mut guard = PowerGuard::new(&mut device);
    guard
        .scale_on(ctx.settle(config.dispense.scale_settle_secs))
        .map_err(|err| session_error("scale on failed", err))?;
    guard.tare().map_err(|err| session_error("tare failed", err))?;
    std::thread::sleep(ctx.settle(config.dispense.tare_settle_secs));
    let value = measure_weight(&mut *guard, &config.measure)
        .map_err(|err| control_error("measurement failed", err))?;
    guard
        .release()
        .map_err(|err| control_error("power down failed", err))?;

    emit(
        &Reading {
            unit: "g",
            value,
            grams: None,
            samples: config.measure.samples,
            filter: config.measure.filter.to_string(),
            tared: true,
        },
        ctx.format,
    );
    Ok(SUCCESS)
}
