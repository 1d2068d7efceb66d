use powderdose_frame::FilterType;
use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// How weights are requested from the scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureSettings {
    /// Samples the firmware averages per reading.
    pub samples: u32,
    pub filter: FilterType,
    /// Requests made before an unreadable weight fails the operation.
    pub attempts: u32,
}

impl Default for MeasureSettings {
    fn default() -> Self {
        Self {
            samples: 100,
            filter: FilterType::Ewma,
            attempts: 3,
        }
    }
}

/// Read the weight in grams, re-requesting unreadable replies.
///
/// Only `SessionError::Unavailable` is retried; timeouts and link errors
/// fail immediately.
pub fn measure_weight<L: SerialLink>(
    device: &mut Device<L>,
    settings: &MeasureSettings,
) -> Result<f64> {
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match device.read_weight(settings.samples, settings.filter) {
            Ok(grams) => return Ok(grams),
            Err(err) if err.is_recoverable() && attempt < attempts => {
                warn!(attempt, attempts, error = %err, "weight unavailable, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Average `count` raw ADC readings. A count of zero takes one reading.
pub fn average_raw<L: SerialLink>(
    device: &mut Device<L>,
    count: u32,
    settings: &MeasureSettings,
) -> Result<f64> {
    let count = count.max(1);
    let mut total = 0.0;
    for _ in 0..count {
        total += read_raw(device, settings)?;
    }
    let mean = total / f64::from(count);
    debug!(count, mean, "averaged raw readings");
    Ok(mean)
}

fn read_raw<L: SerialLink>(device: &mut Device<L>, settings: &MeasureSettings) -> Result<f64> {
    let attempts = settings.attempts.max(1);
    let mut attempt = 1;
    loop {
        match device.read_raw(settings.samples, settings.filter) {
            Ok(raw) => return Ok(raw),
            Err(err) if err.is_recoverable() && attempt < attempts => {
                warn!(attempt, attempts, error = %err, "raw reading unavailable, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
