//! Broadcasting WebSocket server.
//!
//! Every peer that upgrades on the configured path is put in a registry.
//! Text and binary messages from any peer, and messages passed to
//! [`Server::send_message`], go through one shared FIFO queue. A single
//! fan-out task takes each message off the queue and writes it to every
//! registered peer while holding the registry lock for the whole round. A
//! peer whose write fails is removed and closed; the rest of the round
//! continues.
//!
//! Pings are answered inline by the peer's own read task and never queued.

mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::accept;
use crate::error::{Error, Result};
use crate::message::Message;
use registry::Registry;

struct Inner {
    config: ServerConfig,
    registry: Mutex<Registry>,
    queue: mpsc::UnboundedSender<Message>,
    /// Taken by the first `serve` call, which starts the fan-out task.
    queue_rx: SyncMutex<Option<mpsc::UnboundedReceiver<Message>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    closing: AtomicBool,
}

impl Inner {
    async fn serve_peer(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let upgraded = tokio::select! {
            () = self.cancel.cancelled() => return,
            upgraded = accept(stream, &self.config.transport, &self.config.path) => upgraded,
        };
        let (mut reader, writer) = match upgraded {
            Ok(halves) => halves,
            Err(e) => {
                warn!(peer = %addr, error = %e, "upgrade failed");
                return;
            }
        };

        let writer = Arc::new(Mutex::new(writer));
        let Some(id) = self.registry.lock().await.insert(addr, writer.clone(), &self.cancel) else {
            registry::close_writer(addr, &writer).await;
            return;
        };
        info!(peer = %addr, "peer connected");

        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => return,
                received = reader.recv() => received,
            };

            match received {
                Ok(Message::Ping(data)) => {
                    if let Err(e) = writer.lock().await.pong(data).await {
                        warn!(peer = %addr, error = %e, "failed to answer ping");
                        break;
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!(peer = %addr, close = ?frame, "peer closed the connection");
                    break;
                }
                Ok(message) => {
                    debug!(peer = %addr, "relaying message");
                    if self.queue.send(message).is_err() {
                        break;
                    }
                }
                Err(e) if e.is_disconnect() => {
                    info!(peer = %addr, "peer disconnected");
                    break;
                }
                Err(e) => {
                    warn!(peer = %addr, error = %e, "read failed");
                    break;
                }
            }
        }

        let removed = self.registry.lock().await.remove(id);
        if let Some(peer) = removed {
            peer.close().await;
        }
    }

    async fn fan_out(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<Message>) {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };

            self.registry.lock().await.broadcast(&message).await;
        }
    }
}

/// WebSocket server relaying every inbound message to all peers.
///
/// ```rust,no_run
/// use wskit::Server;
///
/// # async fn run() -> wskit::Result<()> {
/// let server = Server::new();
/// server.start("127.0.0.1:13785").await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    inner: Arc<Inner>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a server for the default path `/ws`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::default()),
                queue,
                queue_rx: SyncMutex::new(Some(queue_rx)),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bind a listener for [`serve`](Self::serve).
    ///
    /// # Errors
    ///
    /// Returns `Error::Bind` if the address cannot be bound.
    pub async fn bind(&self, addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| Error::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
    }

    /// Bind `addr` and serve until [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// - `Error::Bind` if the address cannot be bound
    /// - `Error::ServerClosed` if the server was already closed
    pub async fn start(&self, addr: &str) -> Result<()> {
        let listener = self.bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept peers from `listener` until [`close`](Self::close).
    ///
    /// The first call also starts the fan-out task.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServerClosed` if the server was already closed.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::ServerClosed);
        }
        if let Some(queue) = self.inner.queue_rx.lock().take() {
            self.inner.tasks.spawn(self.inner.clone().fan_out(queue));
        }

        match listener.local_addr() {
            Ok(addr) => info!(%addr, path = %self.inner.config.path, "server listening"),
            Err(e) => debug!(error = %e, "listener has no local address"),
        }

        loop {
            let accepted = tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    self.inner
                        .tasks
                        .spawn(self.inner.clone().serve_peer(stream, addr));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    sleep(Duration::from_millis(50)).await;
                }
            }
        }
        Ok(())
    }

    /// Queue a text message for every connected peer.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServerClosed` after [`close`](Self::close).
    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.enqueue(Message::Text(text.into()))
    }

    /// Queue a binary message for every connected peer.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServerClosed` after [`close`](Self::close).
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.enqueue(Message::Binary(data.into()))
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::ServerClosed);
        }
        self.inner
            .queue
            .send(message)
            .map_err(|_| Error::ServerClosed)
    }

    /// Number of registered peers.
    pub async fn connection_count(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    /// Remote addresses of the registered peers.
    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.inner.registry.lock().await.addrs()
    }

    /// Close every peer, stop accepting and wait for all tasks.
    ///
    /// Later calls do nothing.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        {
            let mut registry = self.inner.registry.lock().await;
            for peer in registry.drain() {
                peer.close().await;
            }
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        info!("server closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("path", &self.inner.config.path)
            .field("closing", &self.inner.closing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
