use std::io::{self, Read, Write};
use std::time::Duration;

use powderdose_link::{find_usb_serial, open, PortSettings, SerialLink, SerialPortLink};
use powderdose_session::{Device, SessionConfig};
use powderdose_sim::{SimConfig, SimulatedRig};
use tracing::info;

use crate::exit::{link_error, session_error, CliResult};

/// The link the CLI drives: real hardware or the simulated firmware.
pub enum RigLink {
    Serial(SerialPortLink),
    Sim(SimulatedRig),
}

impl Read for RigLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Serial(port) => port.read(buf),
            Self::Sim(rig) => rig.read(buf),
        }
    }
}

impl Write for RigLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Serial(port) => port.write(buf),
            Self::Sim(rig) => rig.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Serial(port) => port.flush(),
            Self::Sim(rig) => rig.flush(),
        }
    }
}

impl SerialLink for RigLink {
    fn clear_input(&mut self) -> powderdose_link::Result<()> {
        match self {
            Self::Serial(port) => port.clear_input(),
            Self::Sim(rig) => rig.clear_input(),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> powderdose_link::Result<()> {
        match self {
            Self::Serial(port) => port.set_read_timeout(timeout),
            Self::Sim(rig) => rig.set_read_timeout(timeout),
        }
    }

    fn port_name(&self) -> Option<String> {
        match self {
            Self::Serial(port) => port.port_name(),
            Self::Sim(rig) => rig.port_name(),
        }
    }
}

/// Where to find the rig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigOptions {
    /// Serial device; the first USB serial port when `None`.
    pub port: Option<String>,
    pub baud: u32,
    pub simulate: bool,
}

impl RigOptions {
    pub fn open_link(&self) -> CliResult<RigLink> {
        if self.simulate {
            info!("using simulated rig");
            return Ok(RigLink::Sim(SimulatedRig::new(SimConfig::default())));
        }
        let path = match &self.port {
            Some(path) => path.clone(),
            None => {
                find_usb_serial()
                    .map_err(|err| link_error("no rig port", err))?
                    .name
            }
        };
        let settings = PortSettings::new(path).with_baud_rate(self.baud);
        let port = open(&settings).map_err(|err| link_error("open failed", err))?;
        Ok(RigLink::Serial(port))
    }

    /// Open the link, wait for the firmware and power everything down.
    pub fn connect(&self, session: SessionConfig) -> CliResult<Device<RigLink>> {
        let link = self.open_link()?;
        let device =
            Device::connect(link, session).map_err(|err| session_error("connect failed", err))?;
        info!(
            port = device.session().link().port_name().as_deref().unwrap_or("unknown"),
            "rig ready"
        );
        Ok(device)
    }
}
