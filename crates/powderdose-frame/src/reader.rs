use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 512;
const READ_CHUNK_SIZE: usize = 256;
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Reads complete frame bodies from any `Read` stream.
///
/// Handles partial reads and line noise internally; callers always get a
/// complete body.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next frame body, waiting at most `timeout`.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<String> {
        self.read_frame_until(Instant::now() + timeout)
    }

    /// Read the next frame body, waiting until `deadline`.
    ///
    /// Reads that time out or would block count as "no bytes yet". Returns
    /// `Err(FrameError::TimedOut)` once the deadline has passed without a
    /// complete frame, never earlier. Returns
    /// `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame_until(&mut self, deadline: Instant) -> Result<String> {
        loop {
            if let Some(body) = decode_frame(&mut self.buf, self.config.max_body_size)? {
                trace!(body = %body, "decoded frame");
                return Ok(body);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(FrameError::TimedOut);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF.min(deadline - now));
                    continue;
                }
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Discard buffered bytes that have not formed a frame yet.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
