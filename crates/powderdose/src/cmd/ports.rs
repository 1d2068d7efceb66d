use powderdose_link::{list_ports, select_usb_serial, PortInfo};
use serde::Serialize;

use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{emit, OutputFormat, Render};

#[derive(Serialize)]
struct PortEntry {
    name: String,
    description: String,
    hardware_id: String,
    selected: bool,
}

#[derive(Serialize)]
struct PortList {
    ports: Vec<PortEntry>,
}

impl Render for PortList {
    fn title(&self) -> &'static str {
        "serial ports"
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![("found", self.ports.len().to_string())]
    }

    fn rows(&self) -> Option<(Vec<&'static str>, Vec<Vec<String>>)> {
        let rows = self
            .ports
            .iter()
            .map(|port| {
                vec![
                    port.name.clone(),
                    port.description.clone(),
                    port.hardware_id.clone(),
                    if port.selected { "*" } else { "" }.to_string(),
                ]
            })
            .collect();
        Some((vec!["PORT", "DESCRIPTION", "HARDWARE ID", "RIG"], rows))
    }
}

fn entries(ports: &[PortInfo]) -> Vec<PortEntry> {
    let selected = select_usb_serial(ports).map(|port| port.name.clone());
    ports
        .iter()
        .map(|port| PortEntry {
            name: port.name.clone(),
            description: port.description.clone(),
            hardware_id: port.hardware_id.clone(),
            selected: selected.as_deref() == Some(port.name.as_str()),
        })
        .collect()
}

pub fn run(format: OutputFormat) -> CliResult<i32> {
    let ports = list_ports().map_err(|err| link_error("port enumeration failed", err))?;
    emit(
        &PortList {
            ports: entries(&ports),
        },
        format,
    );
    Ok(SUCCESS)
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
    fn marks_first_usb_serial_port() {
        let ports = [
            port("/dev/ttyS0", "n/a"),
            port("/dev/ttyUSB0", "USB Serial Device"),
            port("/dev/ttyUSB1", "USB-Serial Controller"),
        ];
        let selected: Vec<bool> = entries(&ports).iter().map(|e| e.selected).collect();
        assert_eq!(selected, vec![false, true, false]);
    }
}
