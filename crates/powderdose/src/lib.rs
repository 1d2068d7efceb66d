//! Host-side driver for a closed-loop powder dispensing rig.
//!
//! powderdose talks to the rig's controller board over USB serial, dispenses
//! target masses with a staged feedback loop on the load cell, and calibrates
//! the augers and the scale that loop depends on.
//!
//! # Crate Structure
//!
//! - [`link`]: serial port access and enumeration
//! - [`frame`]: `<Name,param,...>` command framing
//! - [`session`]: request/response session and device state tracking
//! - [`control`]: dispensing, purging, calibration and fluidics
//! - [`sim`]: simulated rig firmware (behind `sim` feature)

/// Re-export link types.
pub mod link {
    pub use powderdose_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use powderdose_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use powderdose_session::*;
}

/// Re-export control types.
pub mod control {
    pub use powderdose_control::*;
}

/// Re-export the simulated rig (requires `sim` feature).
#[cfg(feature = "sim")]
pub mod sim {
    pub use powderdose_sim::*;
}
