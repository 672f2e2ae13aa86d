//! Reconnecting WebSocket client.
//!
//! A [`Client`] owns at most one connection at a time. A supervisor task
//! reads from it, answers pings and hands every data message to the
//! client's [`Router`]. When the read side fails the connection is dropped
//! and the supervisor redials every `reconnect_interval` until it succeeds
//! or the client is closed. A keepalive task pings the server every
//! `keepalive_interval` on the current connection.
//!
//! Sends never trigger a reconnect: while no connection is installed they
//! fail with [`Error::Write`]. Use [`Client::wait_connected`] to wait for the
//! supervisor to bring the connection back.

mod state;

pub use state::ClientState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{TcpReader, TcpWriter, dial};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::router::{Envelope, Router};

struct Inner {
    url: String,
    config: ClientConfig,
    router: Router,
    /// Send lock around the current connection's writer.
    writer: Mutex<Option<TcpWriter>>,
    state: watch::Sender<ClientState>,
    inbound: broadcast::Sender<Message>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    closing: AtomicBool,
}

impl Inner {
    fn set_state(&self, next: ClientState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            debug!(url = %self.url, from = %current, to = %next, "client state");
            *current = next;
            true
        });
    }

    /// Make `writer` current and start its keepalive.
    ///
    /// Returns the connection's token, or `None` if the client was closed
    /// while the connection was being dialed.
    async fn install(self: &Arc<Self>, writer: TcpWriter) -> Option<CancellationToken> {
        let mut slot = self.writer.lock().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        *slot = Some(writer);

        let conn = self.cancel.child_token();
        self.tasks.spawn(keepalive(self.clone(), conn.clone()));
        self.set_state(ClientState::Connected);
        Some(conn)
    }

    /// Drop the current writer after a read failure.
    ///
    /// Returns `false` if the client is closing and must not reconnect.
    async fn drop_connection(&self) -> bool {
        let mut slot = self.writer.lock().await;
        if self.cancel.is_cancelled() {
            return false;
        }
        slot.take();
        self.set_state(ClientState::Reconnecting);
        true
    }

    async fn pong(&self, data: Vec<u8>) {
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return;
        };
        if let Err(e) = writer.pong(data).await {
            warn!(url = %self.url, error = %e, "failed to answer ping");
        }
    }
}

/// Reads the current connection, then redials after it fails.
async fn supervise(inner: Arc<Inner>, mut reader: TcpReader, mut conn: CancellationToken) {
    loop {
        // Consumes the reader so the old socket is gone before redialing.
        read_until_failure(&inner, reader, &conn).await;
        conn.cancel();
        if !inner.drop_connection().await {
            return;
        }

        match redial(&inner).await {
            Some((next_reader, next_conn)) => {
                reader = next_reader;
                conn = next_conn;
            }
            None => return,
        }
    }
}

async fn read_until_failure(inner: &Inner, mut reader: TcpReader, conn: &CancellationToken) {
    loop {
        let received = tokio::select! {
            () = conn.cancelled() => return,
            received = reader.recv() => received,
        };

        match received {
            Ok(Message::Ping(data)) => inner.pong(data).await,
            Ok(Message::Pong(_)) => debug!(url = %inner.url, "pong received"),
            Ok(Message::Close(frame)) => {
                info!(url = %inner.url, close = ?frame, "server closed the connection");
                return;
            }
            Ok(message) => {
                if inner.inbound.receiver_count() > 0
                    && inner.inbound.send(message.clone()).is_err()
                {
                    debug!(url = %inner.url, "inbound subscribers gone");
                }
                if let Some(bytes) = message.as_bytes() {
                    inner.router.handle_message(bytes);
                }
            }
            Err(e) => {
                warn!(url = %inner.url, error = %e, "read failed, reconnecting");
                return;
            }
        }
    }
}

/// Sleep and dial until a connection is installed. No backoff, no cap.
async fn redial(inner: &Arc<Inner>) -> Option<(TcpReader, CancellationToken)> {
    let mut attempt: u64 = 0;
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => return None,
            () = sleep(inner.config.reconnect_interval) => {}
        }
        attempt += 1;

        let dialed = tokio::select! {
            () = inner.cancel.cancelled() => return None,
            dialed = dial(&inner.url, &inner.config.transport) => dialed,
        };
        match dialed {
            Ok((reader, writer)) => {
                let conn = inner.install(writer).await?;
                info!(url = %inner.url, attempt, "reconnected");
                return Some((reader, conn));
            }
            Err(e) => warn!(url = %inner.url, attempt, error = %e, "reconnect attempt failed"),
        }
    }
}

async fn keepalive(inner: Arc<Inner>, conn: CancellationToken) {
    let period = inner.config.keepalive_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            () = conn.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut slot = inner.writer.lock().await;
        let sent = match slot.as_mut() {
            Some(writer) => writer.ping(Vec::new()).await,
            None => Err(Error::ConnectionClosed(None)),
        };
        if let Err(e) = sent {
            warn!(url = %inner.url, error = %e, "keepalive ping failed");
        }
    }
}

/// WebSocket client with action routing, keepalive and automatic reconnect.
///
/// ```rust,no_run
/// use wskit::Client;
///
/// # async fn run() -> wskit::Result<()> {
/// let client = Client::connect("ws://127.0.0.1:13785/ws").await?;
/// client.register_route("sms_code", |data| {
///     println!("sms_code: {}", String::from_utf8_lossy(data));
/// });
/// client.send_message(r#"{"action":"sms_code","data":{"phone":"13800000000"}}"#).await?;
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect with the default intervals.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidUrl` if `url` is not a `ws://` URL
    /// - `Error::Dial` if the server cannot be reached or refuses the upgrade
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        Self::with_config(url, ClientConfig::default()).await
    }

    /// Connect with a custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn with_config(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let url = url.into();
        let (inbound, _) = broadcast::channel(config.inbound_capacity.max(1));
        let (state, _) = watch::channel(ClientState::Disconnected);
        let inner = Arc::new(Inner {
            url,
            config,
            router: Router::new(),
            writer: Mutex::new(None),
            state,
            inbound,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            closing: AtomicBool::new(false),
        });

        inner.set_state(ClientState::Connecting);
        let (reader, writer) = dial(&inner.url, &inner.config.transport).await?;
        let conn = inner
            .install(writer)
            .await
            .ok_or(Error::ClientClosed)?;
        inner.tasks.spawn(supervise(inner.clone(), reader, conn));

        info!(url = %inner.url, "client connected");
        Ok(Self { inner })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Register `handler` for `action`, replacing any existing handler.
    pub fn register_route<F>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.inner.router.register_route(action, handler);
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Receive every inbound text and binary message, before routing.
    ///
    /// A receiver that falls more than `inbound_capacity` messages behind
    /// skips the oldest ones.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.inbound.subscribe()
    }

    /// Wait until a connection is installed.
    ///
    /// Returns immediately when already connected.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClientClosed` once the client is closed.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut changes = self.inner.state.subscribe();
        let state = *changes
            .wait_for(|s| s.is_connected() || s.is_terminal())
            .await
            .map_err(|_| Error::ClientClosed)?;
        if state.is_terminal() {
            Err(Error::ClientClosed)
        } else {
            Ok(())
        }
    }

    /// Send a text message on the current connection.
    ///
    /// # Errors
    ///
    /// - `Error::ClientClosed` after [`close`](Self::close)
    /// - `Error::Write` if no connection is installed or the write fails
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// Send a binary message on the current connection.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// Serialize `data` into an envelope for `action` and send it as text.
    ///
    /// # Errors
    ///
    /// `Error::Decode` if `data` does not serialize, otherwise the errors of
    /// [`send_message`](Self::send_message).
    pub async fn send_envelope<T: Serialize + ?Sized>(&self, action: &str, data: &T) -> Result<()> {
        let text = Envelope::new(action, data)?.encode()?;
        self.send_message(text).await
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }
        let mut slot = self.inner.writer.lock().await;
        let writer = slot
            .as_mut()
            .ok_or_else(|| Error::Write("not connected".into()))?;
        writer
            .send(message)
            .await
            .map_err(|e| Error::Write(e.to_string()))
    }

    /// Stop every background task and close the current connection.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Close` if the close frame could not be written. The
    /// client is closed regardless.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();

        let closed = match self.inner.writer.lock().await.take() {
            Some(mut writer) => writer
                .close(CloseCode::Normal, "")
                .await
                .map_err(|e| Error::Close(e.to_string())),
            None => Ok(()),
        };

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.set_state(ClientState::Closed);
        info!(url = %self.inner.url, "client closed");
        closed
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
