use std::time::Duration;

use crate::response::Unavailable;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Serial link error.
    #[error("link error: {0}")]
    Link(#[from] powderdose_link::LinkError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] powderdose_frame::FrameError),

    /// No reply arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The firmware never announced it was ready.
    #[error("rig not ready after {0:?}")]
    NotReady(Duration),

    /// A measurement reply was present but unusable.
    #[error("{tag} measurement unavailable in {body:?}: {reason}")]
    Unavailable {
        tag: &'static str,
        body: String,
        #[source]
        reason: Unavailable,
    },

    /// The link closed underneath the session.
    #[error("rig disconnected: {0}")]
    Disconnected(String),

    /// Another thread panicked while holding the shared session.
    #[error("shared session lock poisoned")]
    Poisoned,
}

impl SessionError {
    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
