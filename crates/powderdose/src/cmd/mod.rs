use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use powderdose_control::{CalibrationTable, ConfigError, RigConfig};
use powderdose_frame::{Direction, FilterType};
use powderdose_session::Device;
use powderdose_sim::SimConfig;

use crate::csvlog::CsvLog;
use crate::exit::{config_error, io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;
use crate::rig::{RigLink, RigOptions};

pub mod calibrate;
pub mod dispense;
pub mod fluidics;
pub mod measure;
pub mod ports;
pub mod sensitivity;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dispense a target mass in grams.
    Dispense(DispenseArgs),
    /// Run the auger until no more powder comes out.
    Purge(PurgeArgs),
    /// Read the scale.
    Measure(MeasureArgs),
    /// Zero the scale.
    Tare,
    /// Fit grams per step for an auger and powder.
    CalibrateAuger(CalibrateAugerArgs),
    /// Fit the load cell against reference weights.
    CalibrateScale(CalibrateScaleArgs),
    /// Run the mixer.
    Mix(TimedArgs),
    /// Open the drain.
    Drain(TimedArgs),
    /// Run a calibrated pump.
    Pump(PumpArgs),
    /// Run the flush pump.
    Flush(FlushArgs),
    /// Drain, flush and drain the mixing chamber.
    Reset(ResetArgs),
    /// Weigh repeated samples to measure dispensing spread.
    Sensitivity(SensitivityArgs),
    /// List serial ports.
    Ports,
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Dispense(args) => dispense::run(args, ctx),
        Command::Purge(args) => dispense::purge(args, ctx),
        Command::Measure(args) => measure::run(args, ctx),
        Command::Tare => measure::tare(ctx),
        Command::CalibrateAuger(args) => calibrate::auger(args, ctx),
        Command::CalibrateScale(args) => calibrate::scale(args, ctx),
        Command::Mix(args) => fluidics::mix(args, ctx),
        Command::Drain(args) => fluidics::drain(args, ctx),
        Command::Pump(args) => fluidics::pump(args, ctx),
        Command::Flush(args) => fluidics::flush(args, ctx),
        Command::Reset(args) => fluidics::reset(args, ctx),
        Command::Sensitivity(args) => sensitivity::run(args, ctx),
        Command::Ports => ports::run(ctx.format),
        Command::Version(args) => version::run(args),
    }
}

/// Auger and powder selection shared by dispensing commands.
#[derive(Args, Debug, Clone, Default)]
pub struct PowderArgs {
    /// Auger type. Defaults to the configured auger.
    #[arg(long)]
    pub auger: Option<String>,
    /// Powder type. Defaults to the configured powder.
    #[arg(long)]
    pub powder: Option<String>,
    /// Auger direction code (0 or 1). Defaults to the configured direction.
    #[arg(long, value_parser = parse_direction)]
    pub direction: Option<Direction>,
}

impl PowderArgs {
    pub fn resolve(&self, config: &RigConfig) -> (String, String, Direction) {
        let defaults = &config.defaults;
        (
            self.auger.clone().unwrap_or_else(|| defaults.auger.clone()),
            self.powder.clone().unwrap_or_else(|| defaults.powder.clone()),
            self.direction.unwrap_or(defaults.dispense_direction),
        )
    }
}

#[derive(Args, Debug)]
pub struct DispenseArgs {
    /// Target mass in grams.
    pub grams: f64,
    #[command(flatten)]
    pub powder: PowderArgs,
    /// Do not write a row to the dispense log.
    #[arg(long)]
    pub no_log: bool,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Auger direction code (0 or 1). Defaults to the configured direction.
    #[arg(long, value_parser = parse_direction)]
    pub direction: Option<Direction>,
}

#[derive(Args, Debug)]
pub struct MeasureArgs {
    /// Report the raw ADC reading instead of grams.
    #[arg(long)]
    pub raw: bool,
    /// Samples averaged by the firmware. Defaults to the configured count.
    #[arg(long)]
    pub samples: Option<u32>,
    /// Smoothing filter (NONE, EWMA, SMA, LPF).
    #[arg(long, value_parser = parse_filter)]
    pub filter: Option<FilterType>,
    /// Tare before reading.
    #[arg(long)]
    pub tare: bool,
}

#[derive(Args, Debug)]
pub struct CalibrateAugerArgs {
    #[command(flatten)]
    pub powder: PowderArgs,
    /// Smallest step count.
    #[arg(long, default_value_t = 100)]
    pub min_steps: u32,
    /// Largest step count.
    #[arg(long, default_value_t = 1000)]
    pub max_steps: u32,
    /// Step count increment.
    #[arg(long, default_value_t = 100)]
    pub interval: u32,
}

#[derive(Args, Debug)]
pub struct CalibrateScaleArgs {
    /// Reference weights in grams (comma-separated). Asked for one by one if omitted.
    #[arg(long, value_delimiter = ',', conflicts_with = "known_weights")]
    pub weights: Option<Vec<f64>>,
    /// Use the reference weights listed in the configuration.
    #[arg(long)]
    pub known_weights: bool,
    /// Raw readings averaged per point. Defaults to the configured count.
    #[arg(long)]
    pub num_meas: Option<u32>,
}

#[derive(Args, Debug)]
pub struct TimedArgs {
    /// Run time in seconds. Defaults to the configured time.
    pub seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct PumpArgs {
    /// Pump identifier from the calibration table.
    pub id: String,
    /// Volume to deliver, converted through the pump calibration.
    #[arg(long, conflicts_with = "seconds", required_unless_present = "seconds")]
    pub volume: Option<f64>,
    /// Run time in seconds.
    #[arg(long)]
    pub seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct FlushArgs {
    /// Volume to flush. Defaults to the configured flush volume.
    #[arg(long, conflicts_with = "seconds")]
    pub volume: Option<f64>,
    /// Flush for this many seconds instead.
    #[arg(long)]
    pub seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Drain time in seconds. Defaults to the configured drain time.
    #[arg(long)]
    pub drain_secs: Option<f64>,
    /// Flush time in seconds. Defaults to the configured flush time.
    #[arg(long)]
    pub flush_secs: Option<f64>,
}

#[derive(Args, Debug)]
pub struct SensitivityArgs {
    /// Repetitions. Defaults to the configured count.
    #[arg(long)]
    pub reps: Option<u32>,
    /// Samples per repetition. Defaults to the configured count.
    #[arg(long)]
    pub samples: Option<u32>,
    /// Dispense this many grams per sample instead of asking for placed samples.
    #[arg(long)]
    pub target: Option<f64>,
    #[command(flatten)]
    pub powder: PowderArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_direction(value: &str) -> Result<Direction, String> {
    let code: u8 = value
        .parse()
        .map_err(|_| format!("invalid direction {value:?}, expected 0 or 1"))?;
    Direction::try_from(code).map_err(|err| err.to_string())
}

fn parse_filter(value: &str) -> Result<FilterType, String> {
    value.parse().map_err(|err: powderdose_frame::FrameError| err.to_string())
}

/// Global options every command runs with.
#[derive(Debug, Clone)]
pub struct Context {
    pub rig: RigOptions,
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    /// The configuration commands run with.
    ///
    /// Against the simulated rig, settle delays are dropped and the default
    /// auger gets the simulator's grams-per-step if it has no calibration.
    pub fn load_config(&self) -> CliResult<RigConfig> {
        let mut config = RigConfig::load_or_default(&self.config_path)
            .map_err(|err| config_error("configuration", err))?;
        if self.rig.simulate {
            config = config.without_settling();
            let auger = config.defaults.auger.clone();
            let powder = config.defaults.powder.clone();
            if config.calibration.auger_factor(&auger, &powder).is_err() {
                config.calibration.set_auger_factor(
                    &auger,
                    &powder,
                    SimConfig::default().grams_per_step,
                );
            }
        }
        Ok(config)
    }

    pub fn connect(&self, config: &RigConfig) -> CliResult<Device<RigLink>> {
        self.rig.connect(config.session_config())
    }

    pub fn dispense_log(&self) -> CliResult<CsvLog> {
        CsvLog::create(&self.log_dir).map_err(|err| io_error("dispense log", err))
    }

    /// Apply a calibration result to the configuration file on disk.
    ///
    /// Re-reads the file so that simulator adjustments are never saved.
    pub fn save_calibration(
        &self,
        apply: impl FnOnce(&mut CalibrationTable) -> Result<(), ConfigError>,
    ) -> CliResult<()> {
        let mut stored = RigConfig::load_or_default(&self.config_path)
            .map_err(|err| config_error("configuration", err))?;
        apply(&mut stored.calibration).map_err(|err| config_error("calibration", err))?;
        stored
            .save(&self.config_path)
            .map_err(|err| config_error("save configuration", err))
    }

    /// Operator-facing pause, skipped against the simulated rig.
    pub fn pause(&self, pause: Duration) -> Duration {
        if self.rig.simulate {
            Duration::ZERO
        } else {
            pause
        }
    }

    /// A configured settle time in seconds, as a pause.
    pub fn settle(&self, seconds: f64) -> Duration {
        self.pause(duration_secs(seconds))
    }
}

/// Negative or non-finite seconds become zero.
pub fn duration_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

pub fn positive_or_usage(name: &str, value: f64) -> CliResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CliError::new(USAGE, format!("{name} must be positive, got {value}")))
    }
}
