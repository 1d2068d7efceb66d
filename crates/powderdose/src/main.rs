mod cmd;
mod csvlog;
mod exit;
mod logging;
mod operator;
mod output;
mod rig;

use std::path::PathBuf;

use clap::Parser;
use powderdose_control::DEFAULT_CONFIG_FILE;
use powderdose_link::DEFAULT_BAUD_RATE;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;
use crate::rig::RigOptions;

#[derive(Parser, Debug)]
#[command(
    name = "powderdose",
    version,
    about = "Closed-loop powder dispensing rig driver"
)]
struct Cli {
    /// Serial port of the rig. Defaults to the first USB serial adapter.
    #[arg(long, value_name = "PATH", env = "POWDERDOSE_PORT", global = true)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    baud: u32,

    /// Calibration and tuning file.
    #[arg(
        long,
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_FILE,
        env = "POWDERDOSE_CONFIG",
        global = true
    )]
    config: PathBuf,

    /// Drive the built-in simulated rig instead of hardware.
    #[arg(long, global = true)]
    simulate: bool,

    /// Directory for dispense logs.
    #[arg(long, value_name = "DIR", default_value = "logs", global = true)]
    log_dir: PathBuf,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn context(&self) -> Context {
        Context {
            rig: RigOptions {
                port: self.port.clone(),
                baud: self.baud,
                simulate: self.simulate,
            },
            config_path: self.config.clone(),
            log_dir: self.log_dir.clone(),
            format: self.format.unwrap_or_else(OutputFormat::default_for_stdout),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = cli.context();
    let result = cmd::run(cli.command, &ctx);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
