//! WebSocket connections split into a reading and a writing half.
//!
//! A connection is opened with [`dial`] on the client side or [`accept`] on
//! the server side. Both run the HTTP upgrade and hand back a
//! [`ConnectionReader`] for the single consumer of inbound messages and a
//! [`ConnectionWriter`] that callers guard with a mutex when several tasks
//! send.
//!
//! ```rust,no_run
//! use wskit::connection::dial;
//! use wskit::{Config, Message};
//!
//! # async fn run() -> wskit::Result<()> {
//! let (mut reader, mut writer) = dial("ws://127.0.0.1:13785/ws", &Config::new()).await?;
//! writer.send(Message::text("hello")).await?;
//! let reply = reader.recv().await?;
//! println!("received: {reply:?}");
//! # Ok(())
//! # }
//! ```

mod role;
mod upgrade;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{ConnectionReader, ConnectionWriter};
pub use role::Role;
pub use upgrade::{Target, TcpReader, TcpWriter, accept, client_handshake, dial, server_handshake};
