use powderdose_frame::Direction;
use powderdose_link::SerialLink;
use powderdose_session::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{positive, secs, settle};
use crate::dispense::DispenseStage;
use crate::error::{ConfigError, ControlError, Result};
use crate::guard::PowerGuard;
use crate::measure::{measure_weight, MeasureSettings};

/// Tuning for [`purge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub burst_steps: u32,
    /// Wait between a burst and its measurement.
    pub settle_secs: f64,
    pub scale_settle_secs: f64,
    /// The auger counts as empty once a burst adds at most this many grams.
    pub epsilon: f64,
    pub max_iterations: u32,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            burst_steps: 200,
            settle_secs: 3.0,
            scale_settle_secs: 2.0,
            epsilon: 0.08,
            max_iterations: 50,
        }
    }
}

impl PurgeConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.burst_steps == 0 || self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "purge: burst_steps and max_iterations must be positive".to_string(),
            ));
        }
        if !positive(self.epsilon) {
            return Err(ConfigError::Invalid(
                "purge: epsilon must be positive".to_string(),
            ));
        }
        if [self.settle_secs, self.scale_settle_secs]
            .iter()
            .any(|s| !(s.is_finite() && *s >= 0.0))
        {
            return Err(ConfigError::Invalid(
                "purge: settle times must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeOutcome {
    pub iterations: u32,
    pub total_steps: u64,
    /// Grams collected since the tare.
    pub final_weight: f64,
}

/// Run the auger until a burst no longer changes the scale reading.
pub fn purge<L: SerialLink>(
    device: &mut Device<L>,
    config: &PurgeConfig,
    measure: &MeasureSettings,
    direction: Direction,
) -> Result<PurgeOutcome> {
    config.validate()?;
    let mut guard = PowerGuard::new(device);

    guard.enable_stepper()?;
    guard.scale_on(secs(config.scale_settle_secs))?;
    guard.tare()?;
    let mut weight = measure_weight(&mut *guard, measure)?;
    info!(start = weight, "purge started");

    let mut iterations = 0;
    let mut total_steps = 0;
    let mut delta = 0.0;
    loop {
        if iterations >= config.max_iterations {
            warn!(iterations, weight, delta, "purge did not settle");
            return Err(ControlError::ConvergenceStalled {
                stage: DispenseStage::Purge,
                bursts: iterations,
                measured: delta,
                target: config.epsilon,
            });
        }
        guard.dispense_steps(config.burst_steps, direction)?;
        iterations += 1;
        total_steps += u64::from(config.burst_steps);
        settle(config.settle_secs);

        let previous = weight;
        weight = measure_weight(&mut *guard, measure)?;
        delta = weight - previous;
        debug!(iterations, weight, delta, "purge burst");
        if delta.abs() <= config.epsilon {
            break;
        }
    }

    guard.release()?;
    info!(iterations, total_steps, weight, "purge finished");
    Ok(PurgeOutcome {
        iterations,
        total_steps,
        final_weight: weight,
    })
}
