//! Angle-bracket command framing for the powder dispensing rig.
//!
//! Every message on the wire is a single ASCII frame:
//! - a `<` start marker
//! - a comma-separated body, command name first
//! - a `>` end marker
//!
//! Bytes outside a frame are line noise and are dropped on decode.

pub mod codec;
pub mod command;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_command, encode_fields, parse_fields, FrameConfig, DEFAULT_MAX_BODY,
    END_MARKER, FIELD_SEPARATOR, START_MARKER,
};
#[cfg(feature = "async")]
pub use codec::FrameCodec;
pub use command::{Command, Direction, FilterType};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
