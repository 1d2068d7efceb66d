use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{LinkError, Result};

/// A byte link to the rig firmware.
///
/// Reads must not block longer than the configured read timeout; a read that
/// finds nothing returns `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
/// Higher layers turn those into deadline-bounded waits.
pub trait SerialLink: Read + Write + Send {
    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Set the upper bound for a single blocking read.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Human-readable device name, if the link has one.
    fn port_name(&self) -> Option<String> {
        None
    }
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(|err| LinkError::Io(err.into()))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.set_timeout(timeout)
            .map_err(|err| LinkError::Io(err.into()))
    }

    fn port_name(&self) -> Option<String> {
        serialport::SerialPort::name(&**self)
    }
}
