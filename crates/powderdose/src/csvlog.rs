use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use powderdose_control::{CalibrationRow, LogRow, LogSink};
use serde::Serialize;
use tracing::info;

/// Scale calibrations accumulate here across runs.
pub const CALIBRATION_LOG_FILE: &str = "calibration_log.csv";

/// Dispense log written as CSV, one file per CLI run.
///
/// Scale calibrations go to [`CALIBRATION_LOG_FILE`] next to it instead,
/// since their columns differ from dispense rows.
pub struct CsvLog {
    writer: csv::Writer<File>,
    path: PathBuf,
    calibration_path: PathBuf,
}

#[derive(Serialize)]
struct CalibrationRecord<'a> {
    timestamp: &'a str,
    slope: f64,
    intercept: f64,
    r_squared: f64,
    points: usize,
}

impl CsvLog {
    /// Create `dir/log_<ddmmyyyy_HHMMSS>.csv`.
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("log_{}.csv", Local::now().format("%d%m%Y_%H%M%S"));
        let path = dir.join(name);
        let writer = csv::Writer::from_path(&path).map_err(io::Error::from)?;
        info!(path = %path.display(), "writing dispense log");
        Ok(Self {
            writer,
            path,
            calibration_path: dir.join(CALIBRATION_LOG_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn calibration_path(&self) -> &Path {
        &self.calibration_path
    }
}

impl LogSink for CsvLog {
    fn record(&mut self, row: &LogRow) -> io::Result<()> {
        self.writer.serialize(row).map_err(io::Error::from)?;
        self.writer.flush()
    }

    fn record_calibration(&mut self, row: &CalibrationRow) -> io::Result<()> {
        let fresh = !self.calibration_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.calibration_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        let timestamp = Local::now().to_rfc3339();
        writer
            .serialize(CalibrationRecord {
                timestamp: &timestamp,
                slope: row.slope,
                intercept: row.intercept,
                r_squared: row.r_squared,
                points: row.points,
            })
            .map_err(io::Error::from)?;
        writer.flush()?;
        info!(path = %self.calibration_path.display(), "recorded scale calibration");
        Ok(())
    }
}
