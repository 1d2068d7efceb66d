use std::io;

use serde::Serialize;

/// One row of the dispense log.
///
/// Field names are the column headers of the log files the rig software
/// has always written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogRow {
    pub desired_amount: Option<f64>,
    pub measured_amount: Option<f64>,
    #[serde(rename = "# of steps")]
    pub steps: Option<u64>,
    pub auger_type: Option<String>,
    pub powder_type: Option<String>,
    pub filter_type: Option<String>,
    pub repetition: Option<u32>,
    pub sample: Option<u32>,
}

/// A finished scale calibration, `raw = slope·grams + intercept`.
///
/// Sinks that keep a history stamp the row with the time they write it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationRow {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub points: usize,
}

/// Destination for log rows.
pub trait LogSink {
    fn record(&mut self, row: &LogRow) -> io::Result<()>;

    fn record_calibration(&mut self, row: &CalibrationRow) -> io::Result<()>;
}

/// Keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    pub rows: Vec<LogRow>,
    pub calibrations: Vec<CalibrationRow>,
}

impl LogSink for MemoryLog {
    fn record(&mut self, row: &LogRow) -> io::Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn record_calibration(&mut self, row: &CalibrationRow) -> io::Result<()> {
        self.calibrations.push(*row);
        Ok(())
    }
}

/// Discards rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl LogSink for NullLog {
    fn record(&mut self, _row: &LogRow) -> io::Result<()> {
        Ok(())
    }

    fn record_calibration(&mut self, _row: &CalibrationRow) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for &mut S {
    fn record(&mut self, row: &LogRow) -> io::Result<()> {
        (**self).record(row)
    }

    fn record_calibration(&mut self, row: &CalibrationRow) -> io::Result<()> {
        (**self).record_calibration(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_column_keeps_legacy_header() {
        let row = LogRow {
            steps: Some(250),
            ..LogRow::default()
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["# of steps"], 250);
        assert!(json.get("steps").is_none());
    }

    #[test]
    fn memory_log_keeps_order() {
        let mut log = MemoryLog::default();
        for sample in 1..=3 {
            log.record(&LogRow {
                sample: Some(sample),
                ..LogRow::default()
            })
            .unwrap();
        }
        let samples: Vec<_> = log.rows.iter().map(|row| row.sample).collect();
        assert_eq!(samples, vec![Some(1), Some(2), Some(3)]);
    }
}
