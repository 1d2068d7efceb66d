use std::sync::{Arc, Mutex};
use std::time::Duration;

use powderdose_frame::{Command, FilterType};
use powderdose_link::SerialLink;

use crate::error::{Result, SessionError};
use crate::response::MeasurementKind;
use crate::session::Session;

/// A [`Session`] shared between threads.
///
/// Each call holds the lock for its whole send-and-reply exchange, so
/// concurrent callers never interleave on the link.
pub struct SharedSession<L> {
    inner: Arc<Mutex<Session<L>>>,
}

impl<L> Clone for SharedSession<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: SerialLink> SharedSession<L> {
    pub fn new(session: Session<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<T>(&self, f: impl FnOnce(&mut Session<L>) -> Result<T>) -> Result<T> {
        let mut session = self.inner.lock().map_err(|_| SessionError::Poisoned)?;
        f(&mut session)
    }

    pub fn request(&self, command: Command) -> Result<String> {
        self.with(|session| session.request(command))
    }

    pub fn measure(
        &self,
        kind: MeasurementKind,
        samples: u32,
        filter: FilterType,
        timeout: Duration,
    ) -> Result<f64> {
        self.with(|session| session.measure(kind, samples, filter, timeout))
    }
}
