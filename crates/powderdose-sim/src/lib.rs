//! Simulated rig firmware.
//!
//! [`SimulatedRig`] speaks the same framed protocol as the real controller
//! board and implements [`powderdose_link::SerialLink`], so every layer above
//! the link can run without hardware. Powder mass, scale tare and actuator
//! power are modelled; stalls, chatter and malformed replies can be injected.

pub mod config;
pub mod rig;

pub use config::{SimConfig, DEFAULT_RAW_INTERCEPT, DEFAULT_RAW_SLOPE};
pub use rig::SimulatedRig;
