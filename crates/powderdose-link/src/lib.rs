//! Serial link abstraction for the powder dispensing rig.
//!
//! The rig firmware is reached over a single USB-serial line. This is the
//! lowest layer of powderdose: everything else talks to the hardware through
//! the [`SerialLink`] trait defined here.

pub mod error;
pub mod port;
pub mod traits;

pub use error::{LinkError, Result};
pub use port::{
    find_usb_serial, list_ports, open, select_usb_serial, PortInfo, PortSettings,
    SerialPortLink, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
};
pub use traits::SerialLink;
