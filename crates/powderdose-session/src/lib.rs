//! Request/response session and device state tracking.
//!
//! This is the layer that knows the rig protocol is strictly one command,
//! one reply. It owns the serial link, waits for the firmware's ready
//! banner, interprets measurement replies and remembers which actuators it
//! has powered.

pub mod device;
pub mod error;
pub mod handshake;
pub mod response;
pub mod session;
pub mod shared;

pub use device::{Device, DeviceState};
pub use error::{Result, SessionError};
pub use handshake::{await_ready, READY_BANNER};
pub use response::{classify, parse_measurement, MeasurementKind, Response, Unavailable};
pub use session::{Session, SessionConfig};
pub use shared::SharedSession;
