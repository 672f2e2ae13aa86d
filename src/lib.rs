//! # wskit - Resilient WebSocket client and broadcast server
//!
//! `wskit` is a small RFC 6455 WebSocket toolkit on top of tokio.
//!
//! ## Features
//!
//! - **Reconnecting client** that redials at a fixed interval after the
//!   connection drops and keeps it alive with periodic pings
//! - **Action routing** of JSON envelopes `{"action": ..., "data": ...}` to
//!   registered handlers, with `data` passed through undecoded
//! - **Broadcast server** that relays every message from any peer to all peers
//!   through one shared queue
//! - **Bounded resources** via frame, message and handshake size limits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wskit::{Client, Server};
//!
//! # async fn run() -> wskit::Result<()> {
//! let server = std::sync::Arc::new(Server::new());
//! let listener = server.bind("127.0.0.1:13785").await?;
//! let serving = server.clone();
//! tokio::spawn(async move { serving.serve(listener).await });
//!
//! let client = Client::connect("ws://127.0.0.1:13785/ws").await?;
//! client.register_route("sms_code", |data| {
//!     println!("sms_code: {}", String::from_utf8_lossy(data));
//! });
//! client.send_envelope("sms_code", &serde_json::json!({"phone": "13800000000"})).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod router;
pub mod server;

pub use client::{Client, ClientState};
pub use config::{ClientConfig, Config, Limits, ServerConfig};
pub use connection::{ConnectionReader, ConnectionWriter, Role};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use router::{Envelope, Router};
pub use server::Server;
