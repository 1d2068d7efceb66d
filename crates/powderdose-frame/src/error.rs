/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A name or parameter contains a delimiter byte.
    #[error("field {field:?} contains reserved byte {byte:?}")]
    ReservedByte { field: String, byte: char },

    /// A frame must carry a command name.
    #[error("empty command name")]
    EmptyName,

    /// The frame body exceeds the configured maximum size.
    #[error("frame body too long ({size} bytes, max {max})")]
    BodyTooLong { size: usize, max: usize },

    /// The frame body is not valid text.
    #[error("frame body is not valid UTF-8")]
    InvalidText,

    /// A command parameter could not be parsed.
    #[error("invalid {name} parameter: {value:?}")]
    InvalidField { name: &'static str, value: String },

    /// The frame names a command this crate does not know.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// No complete frame arrived before the deadline.
    #[error("timed out waiting for a frame")]
    TimedOut,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
