use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameHeader};

/// Generate a random seed for mask generation.
/// Falls back to system time if getrandom fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// Reads frames from the receiving half of a stream.
pub struct FrameReader<R> {
    io: R,
    read_buf: BytesMut,
    role: Role,
    config: Config,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, role: Role, config: Config) -> Self {
        Self::with_buffered(io, role, config, &[])
    }

    /// Start with bytes that were already read past the handshake head.
    #[must_use]
    pub fn with_buffered(io: R, role: Role, config: Config, buffered: &[u8]) -> Self {
        let mut read_buf = BytesMut::with_capacity(config.read_buffer_size.max(buffered.len()));
        read_buf.extend_from_slice(buffered);
        Self {
            io,
            read_buf,
            role,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Masking and size rules, checked as soon as the header is complete so
    /// an oversized payload is never buffered.
    fn check_header(&self, header: &FrameHeader) -> Result<()> {
        match (self.role.expects_masked(), header.mask.is_some()) {
            (true, false) => return Err(Error::UnmaskedClientFrame),
            (false, true) => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        self.config.limits.check_frame_size(header.payload_len)
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next complete frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` on end of stream
    /// - protocol errors for malformed or oversized frames
    /// - `Error::Io` from the underlying stream
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.read_buf) {
                Ok(header) => {
                    self.check_header(&header)?;
                    match Frame::parse(&self.read_buf) {
                        Ok((frame, consumed)) => {
                            self.read_buf.advance(consumed);
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { needed }) => {
                            self.read_buf.reserve(needed);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { .. }) => {
                    self.read_buf.reserve(self.config.read_buffer_size);
                }
                Err(e) => return Err(e),
            }

            let n = self.io.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Writes frames to the sending half of a stream, masking when the role
/// requires it.
pub struct FrameWriter<W> {
    io: W,
    write_buf: BytesMut,
    role: Role,
    mask_counter: u32,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role, config: &Config) -> Self {
        Self {
            io,
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            role,
            mask_counter: random_mask_seed(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode and write one frame in a single `write_all`, then flush.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.role.must_mask().then(|| self.generate_mask());
        self.write_buf.clear();
        frame.encode(&mut self.write_buf, mask);
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
