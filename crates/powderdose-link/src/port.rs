use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use crate::error::{LinkError, Result};

/// Baud rate the rig firmware is built for.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Upper bound on a single blocking read from the port.
///
/// Kept short so that deadline loops above the link stay responsive.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// An open serial device.
pub type SerialPortLink = Box<dyn SerialPort>;

/// How to open the serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl PortSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Open the serial device described by `settings`.
pub fn open(settings: &PortSettings) -> Result<SerialPortLink> {
    let port = serialport::new(settings.path.as_str(), settings.baud_rate)
        .timeout(settings.read_timeout)
        .open()
        .map_err(|source| LinkError::Open {
            path: settings.path.clone(),
            source,
        })?;
    info!(
        path = %settings.path,
        baud = settings.baud_rate,
        "opened serial port"
    );
    Ok(port)
}

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
    pub hardware_id: String,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (description, hardware_id) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "USB Serial Device".to_string());
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = usb.serial_number {
                    hwid.push_str(" SER=");
                    hwid.push_str(&serial);
                }
                (description, hwid)
            }
            SerialPortType::PciPort => ("PCI serial port".to_string(), "PCI".to_string()),
            SerialPortType::BluetoothPort => {
                ("Bluetooth serial port".to_string(), "BLUETOOTH".to_string())
            }
            SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
        };

        Self {
            name: info.port_name,
            description,
            hardware_id,
        }
    }
}

/// Enumerate the serial ports on this host.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(LinkError::Enumerate)?;
    let ports: Vec<PortInfo> = ports.into_iter().map(PortInfo::from).collect();
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports)
}

/// First port whose description mentions "serial" (case-insensitive).
pub fn select_usb_serial(ports: &[PortInfo]) -> Option<&PortInfo> {
    ports
        .iter()
        .find(|port| port.description.to_ascii_lowercase().contains("serial"))
}

/// Find the rig's USB serial adapter.
pub fn find_usb_serial() -> Result<PortInfo> {
    let ports = list_ports()?;
    let found = select_usb_serial(&ports)
        .cloned()
        .ok_or(LinkError::NoPortFound)?;
    info!(port = %found.name, description = %found.description, "selected serial port");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, description: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            description: description.to_string(),
            hardware_id: "n/a".to_string(),
        }
    }

    #[test]
    fn selects_first_serial_description() {
        let ports = vec![
            port("/dev/ttyS0", "n/a"),
            port("/dev/ttyUSB0", "USB-SERIAL CH340"),
            port("/dev/ttyUSB1", "USB Serial Device"),
        ];
        let found = select_usb_serial(&ports).unwrap();
        assert_eq!(found.name, "/dev/ttyUSB0");
    }

    #[test]
    fn selects_nothing_without_serial_ports() {
        let ports = vec![port("/dev/ttyS0", "n/a"), port("COM3", "Bluetooth link")];
        assert!(select_usb_serial(&ports).is_none());
        assert!(select_usb_serial(&[]).is_none());
    }

    #[test]
    fn non_usb_port_info_conversion() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        };
        let converted = PortInfo::from(info);
        assert_eq!(converted.name, "/dev/ttyS0");
        assert_eq!(converted.description, "n/a");
        assert!(select_usb_serial(std::slice::from_ref(&converted)).is_none());
    }

    #[test]
    fn settings_defaults() {
        let settings = PortSettings::new("/dev/ttyUSB0").with_baud_rate(9600);
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(PortSettings::new("x").baud_rate, DEFAULT_BAUD_RATE);
    }
}
