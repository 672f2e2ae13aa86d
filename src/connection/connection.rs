use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::{Frame, OpCode};

/// Receiving half of an upgraded WebSocket connection.
///
/// Yields whole messages: fragmented data messages are reassembled and
/// control frames interleaved between fragments are returned as they arrive.
/// Pings are reported, not answered; replying is up to the owner of the
/// matching [`ConnectionWriter`].
pub struct ConnectionReader<R> {
    frames: FrameReader<R>,
    partial: Option<(OpCode, Vec<u8>)>,
}

impl<R> ConnectionReader<R> {
    pub fn new(io: R, role: Role, config: Config) -> Self {
        Self::with_buffered(io, role, config, &[])
    }

    /// Create a reader that first consumes `buffered`, the bytes that
    /// arrived together with the handshake head.
    pub fn with_buffered(io: R, role: Role, config: Config, buffered: &[u8]) -> Self {
        Self {
            frames: FrameReader::with_buffered(io, role, config, buffered),
            partial: None,
        }
    }

    fn limits(&self) -> &Limits {
        &self.frames.config().limits
    }

    fn start_message(&mut self, frame: Frame) -> Result<Option<Message>> {
        if self.partial.is_some() {
            return Err(Error::ProtocolViolation(
                "data frame inside a fragmented message".into(),
            ));
        }
        let opcode = frame.opcode;
        if frame.fin {
            return finish(opcode, frame.into_payload()).map(Some);
        }
        self.partial = Some((opcode, frame.into_payload()));
        Ok(None)
    }

    fn continue_message(&mut self, frame: Frame) -> Result<Option<Message>> {
        let Some((_, buffer)) = self.partial.as_mut() else {
            return Err(Error::ProtocolViolation(
                "continuation frame without a message to continue".into(),
            ));
        };
        let size = buffer.len() + frame.payload().len();
        self.frames.config().limits.check_message_size(size)?;
        buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }
        match self.partial.take() {
            Some((opcode, payload)) => finish(opcode, payload).map(Some),
            None => Ok(None),
        }
    }
}

fn finish(opcode: OpCode, payload: Vec<u8>) -> Result<Message> {
    match opcode {
        OpCode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| Error::InvalidUtf8),
        OpCode::Binary => Ok(Message::Binary(payload)),
        other => Err(Error::ProtocolViolation(format!(
            "unexpected opcode {other} for a data message"
        ))),
    }
}

impl<R: AsyncRead + Unpin> ConnectionReader<R> {
    /// Receive the next message.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` when the peer goes away without a close frame
    /// - `Error::MessageTooLarge` when a reassembled message exceeds the limit
    /// - protocol and I/O errors from the frame layer
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            let frame = self.frames.read_frame().await?;
            frame.validate()?;

            let message = match frame.opcode {
                OpCode::Ping => Some(Message::Ping(frame.into_payload())),
                OpCode::Pong => Some(Message::Pong(frame.into_payload())),
                OpCode::Close => Some(Message::Close(CloseFrame::from_payload(frame.payload()))),
                OpCode::Text | OpCode::Binary => {
                    self.limits().check_message_size(frame.payload().len())?;
                    self.start_message(frame)?
                }
                OpCode::Continuation => self.continue_message(frame)?,
            };

            if let Some(message) = message {
                return Ok(message);
            }
        }
    }
}

/// Sending half of an upgraded WebSocket connection.
///
/// Every message goes out as a single frame. Once [`close`](Self::close) has
/// run, further sends fail with `Error::ConnectionClosed`.
pub struct ConnectionWriter<W> {
    frames: FrameWriter<W>,
    limits: Limits,
    closed: bool,
}

impl<W> ConnectionWriter<W> {
    pub fn new(io: W, role: Role, config: &Config) -> Self {
        Self {
            frames: FrameWriter::new(io, role, config),
            limits: config.limits.clone(),
            closed: false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn frame_for(&self, message: Message) -> Result<Frame> {
        let frame = match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(Some(close)) => Frame::close(Some(close.code.as_u16()), &close.reason),
            Message::Close(None) => Frame::close(None, ""),
        };
        if frame.opcode.is_control() {
            if frame.payload().len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(frame.payload().len()));
            }
        } else {
            self.limits.check_message_size(frame.payload().len())?;
        }
        Ok(frame)
    }
}

impl<W: AsyncWrite + Unpin> ConnectionWriter<W> {
    /// Send one message as a single frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` after [`close`](Self::close)
    /// - `Error::MessageTooLarge` or `Error::ControlFrameTooLarge` for oversized payloads
    /// - I/O errors from the underlying stream
    pub async fn send(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed(None));
        }
        let frame = self.frame_for(message)?;
        self.frames.write_frame(&frame).await
    }

    pub async fn ping(&mut self, data: Vec<u8>) -> Result<()> {
        self.send(Message::Ping(data)).await
    }

    pub async fn pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.send(Message::Pong(data)).await
    }

    /// Send a close frame and shut down the write direction.
    ///
    /// Does not wait for the peer's close reply. Calling it again is a no-op.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let sent = self
            .frames
            .write_frame(&Frame::close(Some(code.as_u16()), reason))
            .await;
        let shutdown = self.frames.shutdown().await;
        sent.and(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    fn server_reader(bytes: &[u8]) -> ConnectionReader<tokio::io::DuplexStream> {
        let (_tx, rx) = duplex(16);
        ConnectionReader::with_buffered(rx, Role::Server, Config::new(), bytes)
    }

    #[tokio::test]
    async fn test_recv_text_message() {
        // Masked "Hello": mask [0x37, 0xfa, 0x21, 0x3d]
        let mut reader = server_reader(&[
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ]);
        assert_eq!(reader.recv().await.unwrap(), Message::text("Hello"));
    }

    #[tokio::test]
    async fn test_recv_ping_is_reported() {
        let mut reader = server_reader(&[0x89, 0x84, 0, 0, 0, 0, b'p', b'i', b'n', b'g']);
        assert_eq!(reader.recv().await.unwrap(), Message::Ping(b"ping".to_vec()));
    }

    #[tokio::test]
    async fn test_recv_close_frame() {
        let mut reader = server_reader(&[0x88, 0x82, 0, 0, 0, 0, 0x03, 0xe8]);
        match reader.recv().await.unwrap() {
            Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Normal),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reassembles_fragments_around_control_frame() {
        let mut reader = server_reader(&[
            0x01, 0x83, 0, 0, 0, 0, b'H', b'e', b'l', // Text, FIN=0
            0x89, 0x80, 0, 0, 0, 0, // Ping between fragments
            0x80, 0x82, 0, 0, 0, 0, b'l', b'o', // Continuation, FIN=1
        ]);
        assert_eq!(reader.recv().await.unwrap(), Message::Ping(Vec::new()));
        assert_eq!(reader.recv().await.unwrap(), Message::text("Hello"));
    }

    #[tokio::test]
    async fn test_orphan_continuation_rejected() {
        let mut reader = server_reader(&[0x80, 0x81, 0, 0, 0, 0, b'x']);
        assert!(matches!(
            reader.recv().await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_interleaved_data_frame_rejected() {
        let mut reader = server_reader(&[
            0x01, 0x81, 0, 0, 0, 0, b'a', //
            0x81, 0x81, 0, 0, 0, 0, b'b',
        ]);
        assert!(matches!(
            reader.recv().await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_reassembled_message_limit() {
        let config = Config::new().with_limits(Limits::new(1024, 4, 8192));
        let (_tx, rx) = duplex(16);
        let mut reader = ConnectionReader::with_buffered(
            rx,
            Role::Server,
            config,
            &[
                0x02, 0x83, 0, 0, 0, 0, 1, 2, 3, //
                0x80, 0x82, 0, 0, 0, 0, 4, 5,
            ],
        );
        assert_eq!(
            reader.recv().await,
            Err(Error::MessageTooLarge { size: 5, max: 4 })
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let mut reader = server_reader(&[0x81, 0x82, 0, 0, 0, 0, 0xff, 0xfe]);
        assert_eq!(reader.recv().await, Err(Error::InvalidUtf8));
    }

    #[tokio::test]
    async fn test_fragmented_ping_rejected() {
        let mut reader = server_reader(&[0x09, 0x80, 0, 0, 0, 0]);
        assert_eq!(reader.recv().await, Err(Error::FragmentedControlFrame));
    }

    #[tokio::test]
    async fn test_peer_gone_is_connection_closed() {
        let (tx, rx) = duplex(16);
        drop(tx);
        let mut reader = ConnectionReader::new(rx, Role::Client, Config::new());
        assert_eq!(reader.recv().await, Err(Error::ConnectionClosed(None)));
    }

    #[tokio::test]
    async fn test_writer_sends_text_unmasked() {
        let (io, mut peer) = duplex(64);
        let mut writer = ConnectionWriter::new(io, Role::Server, &Config::new());
        writer.send(Message::text("Hello")).await.unwrap();
        drop(writer);

        let mut written = Vec::new();
        peer.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, [&[0x81, 0x05][..], b"Hello"].concat());
    }

    #[tokio::test]
    async fn test_writer_close_then_send_fails() {
        let (io, mut peer) = duplex(64);
        let mut writer = ConnectionWriter::new(io, Role::Server, &Config::new());
        writer.close(CloseCode::Normal, "bye").await.unwrap();
        assert!(writer.is_closed());
        assert_eq!(
            writer.send(Message::text("late")).await,
            Err(Error::ConnectionClosed(None))
        );
        writer.close(CloseCode::Normal, "again").await.unwrap();

        let mut written = Vec::new();
        peer.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, [&[0x88, 0x05, 0x03, 0xe8][..], b"bye"].concat());
    }

    #[tokio::test]
    async fn test_writer_rejects_large_ping() {
        let (io, _peer) = duplex(64);
        let mut writer = ConnectionWriter::new(io, Role::Client, &Config::new());
        assert_eq!(
            writer.ping(vec![0; 126]).await,
            Err(Error::ControlFrameTooLarge(126))
        );
    }

    #[tokio::test]
    async fn test_client_to_server_over_duplex() {
        let (client_io, server_io) = duplex(1024);
        let (server_read, _server_write) = tokio::io::split(server_io);
        let (_client_read, client_write) = tokio::io::split(client_io);

        let mut writer = ConnectionWriter::new(client_write, Role::Client, &Config::new());
        let mut reader = ConnectionReader::new(server_read, Role::Server, Config::new());

        writer.send(Message::binary(vec![9, 8, 7])).await.unwrap();
        writer.pong(b"p".to_vec()).await.unwrap();

        assert_eq!(reader.recv().await.unwrap(), Message::binary(vec![9, 8, 7]));
        assert_eq!(reader.recv().await.unwrap(), Message::Pong(b"p".to_vec()));
    }

    #[tokio::test]
    async fn test_writer_io_error_surfaces() {
        let (io, peer) = duplex(64);
        drop(peer);
        let mut writer = ConnectionWriter::new(io, Role::Server, &Config::new());
        assert!(matches!(
            writer.send(Message::text("x")).await,
            Err(Error::Io(_))
        ));
    }
}
