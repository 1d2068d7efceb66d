use bytes::{Buf, BufMut, BytesMut};

use crate::command::Command;
use crate::error::{FrameError, Result};

/// Frame start marker `<`.
pub const START_MARKER: u8 = b'<';

/// Frame end marker `>`.
pub const END_MARKER: u8 = b'>';

/// Separator between the command name and its parameters.
pub const FIELD_SEPARATOR: u8 = b',';

/// Default maximum body length.
///
/// The firmware receive buffer is 128 bytes; replies can be longer, so the
/// host side allows twice that.
pub const DEFAULT_MAX_BODY: usize = 256;

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes, markers excluded. Default: 256.
    pub max_body_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
        }
    }
}

/// Encode a command name and parameters into the wire format.
///
/// Wire format:
/// ```text
/// <Name,p1,p2,...>
/// ```
///
/// Nothing is escaped: a name or parameter containing `<`, `>` or `,` is
/// rejected.
pub fn encode_fields<S: AsRef<str>>(name: &str, params: &[S], dst: &mut BytesMut) -> Result<()> {
    if name.is_empty() {
        return Err(FrameError::EmptyName);
    }
    check_field(name)?;
    for param in params {
        check_field(param.as_ref())?;
    }

    let body_len = name.len()
        + params
            .iter()
            .map(|param| param.as_ref().len() + 1)
            .sum::<usize>();
    dst.reserve(body_len + 2);
    dst.put_u8(START_MARKER);
    dst.put_slice(name.as_bytes());
    for param in params {
        dst.put_u8(FIELD_SEPARATOR);
        dst.put_slice(param.as_ref().as_bytes());
    }
    dst.put_u8(END_MARKER);
    Ok(())
}

/// Encode a typed command into the wire format.
pub fn encode_command(command: &Command, dst: &mut BytesMut) -> Result<()> {
    encode_fields(command.name(), &command.params(), dst)
}

fn check_field(field: &str) -> Result<()> {
    match field
        .bytes()
        .find(|b| matches!(*b, START_MARKER | END_MARKER | FIELD_SEPARATOR))
    {
        Some(byte) => Err(FrameError::ReservedByte {
            field: field.to_string(),
            byte: char::from(byte),
        }),
        None => Ok(()),
    }
}

/// Decode the next frame body from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Bytes before a start marker are discarded. A second start marker inside
/// an open frame discards the partial body and restarts the frame there, so
/// a returned body never contains `<`. On success, consumes the frame bytes
/// from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_body: usize) -> Result<Option<String>> {
    loop {
        match src.iter().position(|b| *b == START_MARKER) {
            Some(start) => src.advance(start),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        let marker = src[1..]
            .iter()
            .position(|b| matches!(*b, START_MARKER | END_MARKER))
            .map(|offset| offset + 1);

        match marker {
            Some(pos) if src[pos] == START_MARKER => {
                src.advance(pos);
            }
            Some(end) => {
                let frame = src.split_to(end + 1);
                let body = &frame[1..end];
                if body.len() > max_body {
                    return Err(FrameError::BodyTooLong {
                        size: body.len(),
                        max: max_body,
                    });
                }
                let text = std::str::from_utf8(body).map_err(|_| FrameError::InvalidText)?;
                return Ok(Some(text.to_string()));
            }
            None => {
                let partial = src.len() - 1;
                if partial > max_body {
                    src.clear();
                    return Err(FrameError::BodyTooLong {
                        size: partial,
                        max: max_body,
                    });
                }
                return Ok(None); // Need more data
            }
        }
    }
}

/// Split a frame body into its command name and parameters.
pub fn parse_fields(body: &str) -> (&str, Vec<&str>) {
    let mut fields = body.split(char::from(FIELD_SEPARATOR));
    let name = fields.next().unwrap_or_default();
    (name, fields.collect())
}

/// Tokio codec over the same wire format.
///
/// Decodes frame bodies as `String` and encodes typed [`Command`]s.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

#[cfg(feature = "async")]
impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for FrameCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_frame(src, self.config.max_body_size)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Command> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        encode_command(&item, dst)
    }
}
