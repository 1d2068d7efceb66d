use std::time::Duration;

use powderdose_frame::{Command, Direction, FilterType};
use powderdose_link::SerialLink;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::response::MeasurementKind;
use crate::session::{Session, SessionConfig};

/// Actuator power as last commanded by this host.
///
/// Never read back from hardware: it is only as true as the last command
/// that was acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub scale_on: bool,
    pub stepper_on: bool,
}

impl DeviceState {
    /// State assumed right after the link opens, before anything is known.
    pub const UNKNOWN: Self = Self {
        scale_on: true,
        stepper_on: true,
    };
}

/// The rig as seen through a session, with redundant power commands
/// suppressed.
pub struct Device<L> {
    session: Session<L>,
    state: DeviceState,
}

impl<L: SerialLink> Device<L> {
    /// Open the session, wait for the rig, then power both actuators down.
    pub fn connect(link: L, config: SessionConfig) -> Result<Self> {
        let session = Session::connect(link, config)?;
        let mut device = Self::with_state(session, DeviceState::UNKNOWN);
        device.power_down()?;
        Ok(device)
    }

    /// Wrap a session whose actuator state is already known.
    pub fn with_state(session: Session<L>, state: DeviceState) -> Self {
        Self { session, state }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn session(&self) -> &Session<L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<L> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<L> {
        self.session
    }

    /// Energize the stepper. Returns whether a command was sent.
    pub fn enable_stepper(&mut self) -> Result<bool> {
        if self.state.stepper_on {
            return Ok(false);
        }
        self.session.request(Command::DispenserOn)?;
        self.state.stepper_on = true;
        info!("stepper enabled");
        Ok(true)
    }

    /// Release the stepper. Returns whether a command was sent.
    pub fn disable_stepper(&mut self) -> Result<bool> {
        if !self.state.stepper_on {
            return Ok(false);
        }
        self.session.request(Command::DispenserOff)?;
        self.state.stepper_on = false;
        info!("stepper disabled");
        Ok(true)
    }

    /// Power the scale, then wait `settle` if it was off.
    pub fn scale_on(&mut self, settle: Duration) -> Result<bool> {
        if self.state.scale_on {
            return Ok(false);
        }
        self.session.request(Command::ScaleOn)?;
        self.state.scale_on = true;
        info!(settle = ?settle, "scale on");
        std::thread::sleep(settle);
        Ok(true)
    }

    /// Power the scale down. Returns whether a command was sent.
    pub fn scale_off(&mut self) -> Result<bool> {
        if !self.state.scale_on {
            return Ok(false);
        }
        self.session.request(Command::ScaleOff)?;
        self.state.scale_on = false;
        info!("scale off");
        Ok(true)
    }

    pub fn tare(&mut self) -> Result<String> {
        self.session.request(Command::Tare)
    }

    pub fn dispense_steps(&mut self, steps: u32, direction: Direction) -> Result<String> {
        self.session.request(Command::Dispense { steps, direction })
    }

    /// Filtered raw ADC reading.
    pub fn read_raw(&mut self, samples: u32, filter: FilterType) -> Result<f64> {
        self.session
            .measure_default(MeasurementKind::Raw, samples, filter)
    }

    /// Filtered weight in grams.
    pub fn read_weight(&mut self, samples: u32, filter: FilterType) -> Result<f64> {
        self.session
            .measure_default(MeasurementKind::Weight, samples, filter)
    }

    pub fn mix(&mut self, seconds: f64) -> Result<String> {
        self.session.request(Command::Mix { seconds })
    }

    pub fn drain(&mut self, seconds: f64) -> Result<String> {
        self.session.request(Command::Drain { seconds })
    }

    pub fn pump(&mut self, pin: u8, seconds: f64) -> Result<String> {
        self.session.request(Command::Pump { pin, seconds })
    }

    /// Stepper off, then scale off.
    ///
    /// Both are attempted even if the first fails; the first error wins.
    pub fn power_down(&mut self) -> Result<()> {
        let stepper = self.disable_stepper();
        if let Err(err) = &stepper {
            warn!(error = %err, "failed to disable stepper");
        }
        let scale = self.scale_off();
        if let Err(err) = &scale {
            warn!(error = %err, "failed to power scale down");
        }
        stepper?;
        scale?;
        Ok(())
    }
}
