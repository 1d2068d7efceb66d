use std::io::Read;
use std::time::{Duration, Instant};

use powderdose_frame::{FrameError, FrameReader};
use tracing::{debug, info};

use crate::error::{Result, SessionError};

/// Banner the firmware prints once it has finished booting.
pub const READY_BANNER: &str = "Ready to push powder, baby!";

/// Wait until the firmware announces it is ready.
///
/// Every frame before the banner is logged and skipped, as are garbled
/// frames from the boot sequence. Fails with `SessionError::NotReady` if the
/// banner does not arrive within `timeout`.
pub fn await_ready<R: Read>(reader: &mut FrameReader<R>, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match reader.read_frame_until(deadline) {
            Ok(body) if body.contains(READY_BANNER) => {
                info!("rig ready");
                return Ok(());
            }
            Ok(body) => debug!(body = %body, "skipping frame before ready banner"),
            Err(err @ (FrameError::BodyTooLong { .. } | FrameError::InvalidText)) => {
                debug!(error = %err, "skipping garbled frame before ready banner");
            }
            Err(FrameError::TimedOut) => return Err(SessionError::NotReady(timeout)),
            Err(FrameError::ConnectionClosed) => {
                return Err(SessionError::Disconnected(
                    "link closed before ready banner".to_string(),
                ));
            }
            Err(err) => return Err(SessionError::Frame(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind};

    use powderdose_sim::{SimConfig, SimulatedRig};

    use super::*;

    #[test]
    fn skips_noise_before_banner() {
        let wire = b"\xff\xfe<\xc3(><boot 1.3>\r\n<Ready to push powder, baby!>".to_vec();
        let mut reader = FrameReader::new(Cursor::new(wire));
        await_ready(&mut reader, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn simulated_rig_boots() {
        let mut reader = FrameReader::new(SimulatedRig::default());
        await_ready(&mut reader, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn silence_times_out() {
        let timeout = Duration::from_millis(30);
        let mut reader = FrameReader::new(SimulatedRig::new(SimConfig::default().silent()));
        let started = Instant::now();
        let err = await_ready(&mut reader, timeout).unwrap_err();
        assert!(matches!(err, SessionError::NotReady(t) if t == timeout));
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn eof_is_disconnect() {
        let mut reader = FrameReader::new(Cursor::new(b"<boot>".to_vec()));
        let err = await_ready(&mut reader, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SessionError::Disconnected(_)));
    }

    #[test]
    fn io_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::PermissionDenied))
            }
        }
        let mut reader = FrameReader::new(Broken);
        let err = await_ready(&mut reader, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::Io(_))));
    }
}
