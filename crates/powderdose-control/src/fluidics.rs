use std::time::Duration;

use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::table::CalibrationTable;

/// Pump used to rinse the mixing chamber.
pub const FLUSH_PUMP: &str = "Flush";

/// How much a pump should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpAmount {
    /// Volume converted to run time through the pump calibration.
    Volume(f64),
    Seconds(f64),
}

/// Run time for `amount` on pump `id`, or `None` when there is nothing to pump.
pub fn pump_seconds(table: &CalibrationTable, id: &str, amount: PumpAmount) -> Result<Option<f64>> {
    let seconds = match amount {
        PumpAmount::Volume(volume) if volume > 0.0 => table.pump(id)?.seconds_for_volume(volume),
        PumpAmount::Seconds(seconds) if seconds > 0.0 => seconds,
        _ => return Ok(None),
    };
    Ok((seconds.is_finite() && seconds > 0.0).then_some(seconds))
}

/// Run pump `id`. Returns the run time sent, or `None` if no command was sent.
pub fn run_pump<L: SerialLink>(
    device: &mut Device<L>,
    table: &CalibrationTable,
    id: &str,
    amount: PumpAmount,
) -> Result<Option<f64>> {
    let pin = table.pump(id)?.pin;
    let Some(seconds) = pump_seconds(table, id, amount)? else {
        info!(pump = id, ?amount, "nothing to pump");
        return Ok(None);
    };
    info!(pump = id, pin, seconds, "running pump");
    device.pump(pin, seconds)?;
    Ok(Some(seconds))
}

pub fn run_flush<L: SerialLink>(
    device: &mut Device<L>,
    table: &CalibrationTable,
    amount: PumpAmount,
) -> Result<Option<f64>> {
    run_pump(device, table, FLUSH_PUMP, amount)
}

pub fn run_mixer<L: SerialLink>(device: &mut Device<L>, seconds: f64) -> Result<()> {
    info!(seconds, "running mixer");
    device.mix(seconds)?;
    Ok(())
}

pub fn run_drain<L: SerialLink>(device: &mut Device<L>, seconds: f64) -> Result<()> {
    info!(seconds, "draining");
    device.drain(seconds)?;
    Ok(())
}

/// Drain, flush, drain again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetPlan {
    pub drain_secs: f64,
    pub flush_secs: f64,
    /// Pause after each step.
    pub pause: Duration,
}

impl Default for ResetPlan {
    fn default() -> Self {
        Self {
            drain_secs: 10.0,
            flush_secs: 1.0,
            pause: Duration::from_secs(1),
        }
    }
}

/// Empty and rinse the mixing chamber.
pub fn reset<L: SerialLink>(
    device: &mut Device<L>,
    table: &CalibrationTable,
    plan: &ResetPlan,
) -> Result<()> {
    info!(drain = plan.drain_secs, flush = plan.flush_secs, "resetting chamber");
    run_drain(device, plan.drain_secs)?;
    std::thread::sleep(plan.pause);
    run_flush(device, table, PumpAmount::Seconds(plan.flush_secs))?;
    std::thread::sleep(plan.pause);
    run_drain(device, plan.drain_secs)?;
    std::thread::sleep(plan.pause);
    Ok(())
}
