use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use powderdose_frame::{decode_frame, Command, DEFAULT_MAX_BODY};
use powderdose_link::SerialLink;
use tracing::{debug, trace};

use crate::config::SimConfig;

const READY_BANNER: &str = "Ready to push powder, baby!";
const BOOT_NOISE: &[u8] = b"\r\n\x00\xff boot v1.3\r\n";
const INITIAL_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Simulated rig firmware behind a serial link.
///
/// Clones share the same rig, so a test can keep a handle for inspection
/// while the driver owns another as its link.
#[derive(Clone)]
pub struct SimulatedRig {
    inner: Arc<Mutex<RigState>>,
}

struct RigState {
    config: SimConfig,
    scale_on: bool,
    stepper_on: bool,
    pan_grams: f64,
    external_load: f64,
    tare_offset: f64,
    hopper_grams: Option<f64>,
    total_steps: u64,
    malformed_left: usize,
    clock_ms: u64,
    read_timeout: Duration,
    rx: BytesMut,
    tx: VecDeque<u8>,
    commands: Vec<Command>,
}

impl SimulatedRig {
    pub fn new(config: SimConfig) -> Self {
        let mut state = RigState {
            scale_on: false,
            stepper_on: false,
            pan_grams: 0.0,
            external_load: 0.0,
            tare_offset: 0.0,
            hopper_grams: config.hopper_grams,
            total_steps: 0,
            malformed_left: config.malformed_weight_replies,
            clock_ms: 0,
            read_timeout: INITIAL_READ_TIMEOUT,
            rx: BytesMut::new(),
            tx: VecDeque::new(),
            commands: Vec::new(),
            config,
        };
        if state.config.banner && !state.config.silent {
            state.tx.extend(BOOT_NOISE);
            state.reply(READY_BANNER);
        }
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every command the rig has received, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    /// Forget the recorded commands.
    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Powder delivered onto the pan so far, in grams.
    pub fn dispensed_mass(&self) -> f64 {
        self.state().pan_grams
    }

    /// Total auger steps executed while the stepper was energized.
    pub fn total_steps(&self) -> u64 {
        self.state().total_steps
    }

    pub fn scale_on(&self) -> bool {
        self.state().scale_on
    }

    pub fn stepper_on(&self) -> bool {
        self.state().stepper_on
    }

    /// How long a read with nothing to return blocks.
    pub fn read_timeout(&self) -> Duration {
        self.state().read_timeout
    }

    /// Put a known mass on the pan (calibration weights, samples).
    pub fn set_external_load(&self, grams: f64) {
        self.state().external_load = grams;
    }

    /// Remove the dispensed powder from the pan.
    pub fn empty_pan(&self) {
        self.state().pan_grams = 0.0;
    }

    /// Queue an arbitrary line as if the firmware had printed it.
    pub fn inject(&self, bytes: &[u8]) {
        self.state().tx.extend(bytes);
    }
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl std::fmt::Debug for SimulatedRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimulatedRig")
            .field("scale_on", &state.scale_on)
            .field("stepper_on", &state.stepper_on)
            .field("pan_grams", &state.pan_grams)
            .field("total_steps", &state.total_steps)
            .finish()
    }
}

impl RigState {
    fn reply(&mut self, body: &str) {
        if self.config.silent {
            return;
        }
        self.tx.push_back(b'<');
        self.tx.extend(body.as_bytes());
        self.tx.extend(b">\r\n");
    }

    fn ack(&mut self, name: &str) {
        self.clock_ms += 1;
        let body = format!("Msg {name} Time {}", self.clock_ms);
        self.reply(&body);
    }

    fn load(&self) -> f64 {
        self.pan_grams + self.external_load
    }

    fn handle_body(&mut self, body: &str) {
        let command = match Command::parse(body) {
            Ok(command) => command,
            Err(err) => {
                debug!(body, error = %err, "simulated firmware rejected frame");
                let body = format!("Error {err}").replace(['<', '>'], "");
                self.reply(&body);
                return;
            }
        };
        trace!(command = %command, "simulated firmware received");
        self.commands.push(command.clone());

        match command {
            Command::Dispense { steps, direction } => {
                if self.stepper_on {
                    self.total_steps += u64::from(steps);
                    if direction == self.config.direction {
                        let mut delivered = f64::from(steps) * self.config.grams_per_step;
                        if let Some(left) = self.hopper_grams.as_mut() {
                            delivered = delivered.min(*left);
                            *left -= delivered;
                        }
                        self.pan_grams += delivered;
                    }
                }
                self.ack("Dispense");
            }
            Command::DispenserOn => {
                self.stepper_on = true;
                self.ack("DispenserOn");
            }
            Command::DispenserOff => {
                self.stepper_on = false;
                self.ack("DispenserOff");
            }
            Command::ScaleOn => {
                self.scale_on = true;
                self.ack("ScaleOn");
            }
            Command::ScaleOff => {
                self.scale_on = false;
                self.ack("ScaleOff");
            }
            Command::Tare => {
                if self.scale_on {
                    self.tare_offset = self.load();
                }
                self.ack("Tare");
            }
            Command::Adc { samples, .. } => {
                if self.config.chatter {
                    self.ack("ADC");
                }
                let body = if self.scale_on {
                    let raw = self.config.raw_slope * self.load() + self.config.raw_intercept;
                    format!("ADC:{:.0},{samples}", raw)
                } else {
                    "ADC:off".to_string()
                };
                self.reply(&body);
            }
            Command::Meas { samples, .. } => {
                if self.config.chatter {
                    self.ack("Meas");
                }
                let body = if self.malformed_left > 0 {
                    self.malformed_left -= 1;
                    "Weight:garbage".to_string()
                } else if self.scale_on {
                    format!("Weight:{:.4},{samples}", self.load() - self.tare_offset)
                } else {
                    "Weight:off".to_string()
                };
                self.reply(&body);
            }
            Command::Mix { .. } => self.ack("Mix"),
            Command::Drain { .. } => self.ack("Drain"),
            Command::Pump { .. } => self.ack("Pump"),
        }
    }
}

impl Read for SimulatedRig {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.tx.is_empty() {
            let wait = state.read_timeout;
            drop(state);
            std::thread::sleep(wait);
            return Err(io::Error::new(ErrorKind::TimedOut, "simulated read timeout"));
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedRig {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.rx.extend_from_slice(buf);
        loop {
            match decode_frame(&mut state.rx, DEFAULT_MAX_BODY) {
                Ok(Some(body)) => state.handle_body(&body),
                Ok(None) => break,
                Err(err) => debug!(error = %err, "simulated firmware dropped frame"),
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for SimulatedRig {
    fn clear_input(&mut self) -> powderdose_link::Result<()> {
        self.state().tx.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> powderdose_link::Result<()> {
        self.state().read_timeout = timeout;
        Ok(())
    }

    fn port_name(&self) -> Option<String> {
        Some("simulated".to_string())
    }
}
