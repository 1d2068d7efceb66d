use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load-cell line `raw = slope·grams + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for ScaleParams {
    fn default() -> Self {
        Self {
            slope: 32_591.490_262_430_038,
            intercept: 421_737.026_294_600_86,
        }
    }
}

impl ScaleParams {
    pub fn grams_from_raw(&self, raw: f64) -> f64 {
        (raw - self.intercept) / self.slope
    }
}

/// Pump run time `seconds = a·volume + b`, on output `pin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpCalibration {
    pub pin: u8,
    pub a: f64,
    pub b: f64,
}

impl PumpCalibration {
    pub fn seconds_for_volume(&self, volume: f64) -> f64 {
        self.a * volume + self.b
    }
}

/// A reference mass available for scale calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationWeight {
    pub value: f64,
}

/// Everything the calibration procedures learn about the rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTable {
    /// Grams per auger step, by auger then powder.
    pub augers: BTreeMap<String, BTreeMap<String, f64>>,
    pub pumps: BTreeMap<String, PumpCalibration>,
    pub scale: ScaleParams,
    pub weights: Vec<CalibrationWeight>,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        let mut pumps = BTreeMap::new();
        pumps.insert(
            crate::fluidics::FLUSH_PUMP.to_string(),
            PumpCalibration {
                pin: 12,
                a: 1.0,
                b: 0.0,
            },
        );
        Self {
            augers: BTreeMap::new(),
            pumps,
            scale: ScaleParams::default(),
            weights: Vec::new(),
        }
    }
}

impl CalibrationTable {
    /// Grams per step for `auger` moving `powder`.
    pub fn auger_factor(&self, auger: &str, powder: &str) -> Result<f64, ConfigError> {
        let factor = self
            .augers
            .get(auger)
            .and_then(|powders| powders.get(powder))
            .copied()
            .ok_or_else(|| ConfigError::MissingAuger {
                auger: auger.to_string(),
                powder: powder.to_string(),
            })?;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ConfigError::InvalidFactor {
                auger: auger.to_string(),
                powder: powder.to_string(),
                factor,
            });
        }
        Ok(factor)
    }

    pub fn set_auger_factor(&mut self, auger: &str, powder: &str, factor: f64) {
        self.augers
            .entry(auger.to_string())
            .or_default()
            .insert(powder.to_string(), factor);
    }

    pub fn pump(&self, id: &str) -> Result<&PumpCalibration, ConfigError> {
        self.pumps
            .get(id)
            .ok_or_else(|| ConfigError::MissingPump(id.to_string()))
    }

    /// Reference masses in grams.
    pub fn known_weights(&self) -> Vec<f64> {
        self.weights.iter().map(|weight| weight.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auger_factor_lookup() {
        let mut table = CalibrationTable::default();
        assert!(matches!(
            table.auger_factor("8mm_base", "dishwasher_salt"),
            Err(ConfigError::MissingAuger { .. })
        ));

        table.set_auger_factor("8mm_base", "dishwasher_salt", 0.01);
        assert_eq!(table.auger_factor("8mm_base", "dishwasher_salt").unwrap(), 0.01);
        assert!(table.auger_factor("8mm_base", "flour").is_err());

        table.set_auger_factor("8mm_base", "flour", -0.2);
        assert!(matches!(
            table.auger_factor("8mm_base", "flour"),
            Err(ConfigError::InvalidFactor { .. })
        ));
    }

    #[test]
    fn pump_time_from_volume() {
        let pump = PumpCalibration {
            pin: 7,
            a: 0.5,
            b: 0.25,
        };
        assert_eq!(pump.seconds_for_volume(10.0), 5.25);

        let table = CalibrationTable::default();
        assert_eq!(table.pump("Flush").unwrap().pin, 12);
        assert!(matches!(
            table.pump("Acid"),
            Err(ConfigError::MissingPump(id)) if id == "Acid"
        ));
    }

    #[test]
    fn raw_readings_convert_to_grams() {
        let scale = ScaleParams {
            slope: 2000.0,
            intercept: 1000.0,
        };
        assert_eq!(scale.grams_from_raw(6000.0), 2.5);
        assert_eq!(scale.grams_from_raw(1000.0), 0.0);
        assert!(scale.grams_from_raw(0.0) < 0.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let table: CalibrationTable = serde_json::from_str(
            r#"{"augers": {"8mm_base": {"dishwasher_salt": 0.0123}}, "weights": [{"value": 5.0}]}"#,
        )
        .unwrap();
        assert_eq!(table.auger_factor("8mm_base", "dishwasher_salt").unwrap(), 0.0123);
        assert_eq!(table.known_weights(), vec![5.0]);
        assert_eq!(table.scale, ScaleParams::default());
        assert!(table.pumps.contains_key("Flush"));
    }
}
