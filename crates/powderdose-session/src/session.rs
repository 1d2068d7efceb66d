use std::time::{Duration, Instant};

use powderdose_frame::{
    Command, FilterType, FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_BODY,
};
use powderdose_link::{SerialLink, DEFAULT_READ_TIMEOUT};
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::handshake::await_ready;
use crate::response::{classify, parse_measurement, MeasurementKind, Unavailable};

/// Timing limits for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for a reply to an untimed command.
    ///
    /// Timed commands (mix, drain, pump) get their run time added on top.
    pub request_timeout: Duration,
    /// How long to wait for a tagged measurement reply.
    pub measure_timeout: Duration,
    /// How long to wait for the ready banner after opening the link.
    pub ready_timeout: Duration,
    /// Maximum reply body size in bytes.
    pub max_body_size: usize,
    /// Longest single blocking read on the link. Deadlines are checked
    /// between reads, so this bounds how late a timeout can be noticed.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            measure_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            max_body_size: DEFAULT_MAX_BODY,
            poll_interval: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// A request/response session over one serial link.
///
/// At most one request is outstanding: every method takes `&mut self` and
/// returns only after its reply has been read or its deadline has passed.
pub struct Session<L> {
    reader: FrameReader<L>,
    config: SessionConfig,
}

impl<L: SerialLink> Session<L> {
    /// Wrap a link without waiting for the ready banner.
    pub fn new(link: L, config: SessionConfig) -> Self {
        let frame_config = FrameConfig {
            max_body_size: config.max_body_size,
        };
        Self {
            reader: FrameReader::with_config(link, frame_config),
            config,
        }
    }

    /// Wrap a link, apply the poll interval and wait for the firmware's
    /// ready banner.
    pub fn connect(link: L, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(link, config);
        let poll = session.config.poll_interval;
        session.reader.get_mut().set_read_timeout(poll)?;
        session.await_ready()?;
        Ok(session)
    }

    /// Wait for the ready banner using the configured timeout.
    pub fn await_ready(&mut self) -> Result<()> {
        await_ready(&mut self.reader, self.config.ready_timeout)
    }

    /// Discard stale input, then encode and write `command`.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.reader.get_mut().clear_input()?;
        self.reader.clear();
        info!(command = %command, "sending command");
        FrameWriter::new(self.reader.get_mut()).send(command)?;
        Ok(())
    }

    /// Read the next reply body, waiting until `deadline`.
    pub fn next_body_until(&mut self, deadline: Instant) -> Result<String> {
        let waited = deadline.saturating_duration_since(Instant::now());
        self.read_body(deadline, waited)
    }

    /// Send `command` and wait for its reply with the default timeout.
    pub fn request(&mut self, command: Command) -> Result<String> {
        let timeout = self.config.request_timeout + command.run_time().unwrap_or_default();
        self.request_with_timeout(command, timeout)
    }

    /// Send `command` and wait at most `timeout` for its reply.
    ///
    /// A timeout is reported, never retried.
    pub fn request_with_timeout(&mut self, command: Command, timeout: Duration) -> Result<String> {
        self.send(&command)?;
        self.read_body(Instant::now() + timeout, timeout)
    }

    /// Request a measurement and return its first value.
    ///
    /// Replies without the expected tag are logged and skipped until the
    /// deadline. A tagged reply whose value cannot be read fails with
    /// `SessionError::Unavailable`.
    pub fn measure(
        &mut self,
        kind: MeasurementKind,
        samples: u32,
        filter: FilterType,
        timeout: Duration,
    ) -> Result<f64> {
        self.send(&kind.command(samples, filter))?;
        let deadline = Instant::now() + timeout;
        loop {
            let body = self.read_body(deadline, timeout)?;
            match parse_measurement(&body, kind.tag()) {
                Ok(value) => {
                    debug!(kind = %kind, value, "measurement");
                    return Ok(value);
                }
                Err(Unavailable::MissingTag) => {
                    debug!(response = ?classify(&body), "skipping reply without {kind} tag");
                }
                Err(reason) => {
                    return Err(SessionError::Unavailable {
                        tag: kind.tag(),
                        body,
                        reason,
                    });
                }
            }
        }
    }

    /// Request a measurement with the configured measurement timeout.
    pub fn measure_default(
        &mut self,
        kind: MeasurementKind,
        samples: u32,
        filter: FilterType,
    ) -> Result<f64> {
        let timeout = self.config.measure_timeout;
        self.measure(kind, samples, filter, timeout)
    }

    fn read_body(&mut self, deadline: Instant, timeout: Duration) -> Result<String> {
        match self.reader.read_frame_until(deadline) {
            Ok(body) => {
                debug!(reply = %body, "received reply");
                Ok(body)
            }
            Err(FrameError::TimedOut) => Err(SessionError::Timeout(timeout)),
            Err(FrameError::ConnectionClosed) => Err(SessionError::Disconnected(
                "link closed while waiting for reply".to_string(),
            )),
            Err(err) => Err(SessionError::Frame(err)),
        }
    }

    /// Current session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Borrow the underlying link.
    pub fn link(&self) -> &L {
        self.reader.get_ref()
    }

    /// Mutably borrow the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        self.reader.get_mut()
    }

    /// Consume the session and return the link.
    pub fn into_link(self) -> L {
        self.reader.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use powderdose_frame::Direction;
    use powderdose_sim::{SimConfig, SimulatedRig};

    use super::*;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            request_timeout: Duration::from_millis(200),
            measure_timeout: Duration::from_millis(200),
            ready_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn connect_then_request() {
        let rig = SimulatedRig::default();
        let mut session = Session::connect(rig.clone(), fast_config()).unwrap();
        let reply = session.request(Command::ScaleOn).unwrap();
        assert!(reply.starts_with("Msg ScaleOn"), "{reply}");
        assert_eq!(rig.commands(), vec![Command::ScaleOn]);
    }

    #[test]
    fn connect_applies_poll_interval() {
        let rig = SimulatedRig::default();
        let config = SessionConfig {
            poll_interval: Duration::from_millis(7),
            ..fast_config()
        };
        Session::connect(rig.clone(), config).unwrap();
        assert_eq!(rig.read_timeout(), Duration::from_millis(7));
    }

    #[test]
    fn silent_reads_wait_one_poll_interval() {
        let poll = Duration::from_millis(60);
        let rig = SimulatedRig::new(SimConfig::default().silent());
        let mut session = Session::new(rig.clone(), fast_config());
        session.link_mut().set_read_timeout(poll).unwrap();
        let started = Instant::now();
        let err = session
            .request_with_timeout(Command::Tare, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
        assert!(started.elapsed() >= poll);
    }

    #[test]
    fn connect_fails_on_silent_rig() {
        let rig = SimulatedRig::new(SimConfig::default().silent());
        let err = Session::connect(rig, fast_config()).err().unwrap();
        assert!(matches!(err, SessionError::NotReady(_)));
    }

    #[test]
    fn request_times_out_without_retry() {
        let rig = SimulatedRig::new(SimConfig::default().silent());
        let mut session = Session::new(rig.clone(), fast_config());
        let timeout = Duration::from_millis(25);
        let started = Instant::now();
        let err = session
            .request_with_timeout(Command::Tare, timeout)
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(t) if t == timeout));
        assert!(started.elapsed() >= timeout);
        assert_eq!(rig.commands(), vec![Command::Tare]);
    }

    #[test]
    fn stale_input_is_cleared_before_send() {
        let rig = SimulatedRig::default();
        let mut session = Session::new(rig.clone(), fast_config());
        rig.inject(b"<Weight:99.0>");
        let reply = session
            .request(Command::Dispense {
                steps: 1,
                direction: Direction::Forward,
            })
            .unwrap();
        assert!(reply.starts_with("Msg Dispense"), "{reply}");
    }

    #[test]
    fn measure_skips_untagged_replies() {
        let rig = SimulatedRig::new(SimConfig::default().with_chatter());
        let mut session = Session::connect(rig, fast_config()).unwrap();
        session.request(Command::ScaleOn).unwrap();
        let raw = session
            .measure(
                MeasurementKind::Raw,
                10,
                FilterType::Ewma,
                Duration::from_millis(200),
            )
            .unwrap();
        assert_eq!(raw, 421_737.0);
    }

    #[test]
    fn measure_reports_malformed_reply() {
        let rig = SimulatedRig::new(SimConfig::default().with_malformed_weights(1));
        let mut session = Session::connect(rig, fast_config()).unwrap();
        session.request(Command::ScaleOn).unwrap();

        let err = session
            .measure_default(MeasurementKind::Weight, 5, FilterType::Ewma)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            SessionError::Unavailable {
                tag: "Weight",
                reason: Unavailable::NotNumeric(_),
                ..
            }
        ));

        let weight = session
            .measure_default(MeasurementKind::Weight, 5, FilterType::Ewma)
            .unwrap();
        assert_eq!(weight, 0.0);
    }

    #[test]
    fn measure_times_out_on_silent_rig() {
        let rig = SimulatedRig::new(SimConfig::default().silent());
        let mut session = Session::new(rig, fast_config());
        let err = session
            .measure(
                MeasurementKind::Weight,
                1,
                FilterType::None,
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
    }

    #[test]
    fn next_body_until_reads_pending_reply() {
        let rig = SimulatedRig::default();
        let mut session = Session::new(rig.clone(), fast_config());
        assert_eq!(
            session
                .next_body_until(Instant::now() + Duration::from_millis(100))
                .unwrap(),
            "Ready to push powder, baby!"
        );
        session.send(&Command::Tare).unwrap();
        let body = session
            .next_body_until(Instant::now() + Duration::from_millis(100))
            .unwrap();
        assert!(body.starts_with("Msg Tare"));
        assert_eq!(session.link().port_name().as_deref(), Some("simulated"));
    }
}
