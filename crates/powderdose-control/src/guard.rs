use std::ops::{Deref, DerefMut};

use powderdose_link::SerialLink;
use powderdose_session::Device;
use tracing::warn;

use crate::error::Result;

/// Powers the rig down when dropped.
///
/// Procedures take one before energizing anything, so every exit path,
/// including `?` and panics, leaves the stepper released and the scale off.
/// Call [`PowerGuard::release`] on success to see the power-down result.
pub struct PowerGuard<'a, L: SerialLink> {
    device: &'a mut Device<L>,
    armed: bool,
}

impl<'a, L: SerialLink> PowerGuard<'a, L> {
    pub fn new(device: &'a mut Device<L>) -> Self {
        Self {
            device,
            armed: true,
        }
    }

    /// Power down now and report the result.
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.device.power_down()?;
        Ok(())
    }
}

impl<L: SerialLink> Deref for PowerGuard<'_, L> {
    type Target = Device<L>;

    fn deref(&self) -> &Device<L> {
        self.device
    }
}

impl<L: SerialLink> DerefMut for PowerGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut Device<L> {
        self.device
    }
}

impl<L: SerialLink> Drop for PowerGuard<'_, L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.device.power_down() {
            warn!(error = %err, "power-down on exit failed");
        }
    }
}
