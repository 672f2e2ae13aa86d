//! Error types for the client, server and the WebSocket transport beneath them.
//!
//! Transport errors follow RFC 6455; the lifecycle errors (`Dial`, `Write`,
//! `Decode`, ...) are what the client, router and server report upward.

use thiserror::Error;

/// Result type alias for wskit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the client, server or transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Establishing a connection failed (TCP connect or upgrade handshake).
    #[error("Dial failed: {0}")]
    Dial(String),

    /// Writing a frame to the current connection failed.
    #[error("Write failed: {0}")]
    Write(String),

    /// An inbound message is not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Decode(String),

    /// No handler is registered for a decoded action.
    #[error("No route registered for action {0:?}")]
    UnroutedAction(String),

    /// Upgrading an inbound HTTP request to a WebSocket failed.
    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    /// Writing a broadcast to one registered peer failed.
    #[error("Broadcast to {peer} failed: {reason}")]
    BroadcastWrite {
        /// Remote address of the failing peer.
        peer: String,
        /// Underlying write error.
        reason: String,
    },

    /// Binding the listening address failed.
    #[error("Bind to {addr} failed: {reason}")]
    Bind {
        /// Requested bind address.
        addr: String,
        /// Underlying I/O error.
        reason: String,
    },

    /// Closing the current connection failed.
    #[error("Close failed: {0}")]
    Close(String),

    /// The client has been closed and accepts no further work.
    #[error("Client is closed")]
    ClientClosed,

    /// The server has been closed and accepts no further broadcasts.
    #[error("Server is closed")]
    ServerClosed,

    /// The target address is not a usable `ws://` URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Payload length in the header cannot be represented on this platform.
    #[error("Payload too large for platform: {size} bytes (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared payload size.
        size: u64,
        /// Platform maximum.
        max: u64,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake exceeds the configured size limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set; no extensions are ever negotiated.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },
}

impl Error {
    /// Whether this error means the peer is gone rather than misbehaving.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_) | Error::Io(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
