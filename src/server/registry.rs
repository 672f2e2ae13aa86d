//! Registered peers of a [`Server`](super::Server).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::TcpWriter;
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};

pub(crate) type PeerId = u64;

/// Writing half of a peer, shared between its read task (pongs) and the
/// fan-out task.
pub(crate) type SharedWriter = Arc<Mutex<TcpWriter>>;

pub(crate) struct Peer {
    pub(crate) addr: SocketAddr,
    writer: SharedWriter,
}

impl Peer {
    pub(crate) async fn send(&self, message: Message) -> Result<()> {
        self.writer.lock().await.send(message).await
    }

    pub(crate) async fn close(&self) {
        close_writer(self.addr, &self.writer).await;
    }
}

pub(crate) async fn close_writer(addr: SocketAddr, writer: &SharedWriter) {
    if let Err(e) = writer.lock().await.close(CloseCode::Normal, "").await {
        debug!(peer = %addr, error = %e, "close frame not delivered");
    }
}

/// Peers keyed by registration order.
#[derive(Default)]
pub(crate) struct Registry {
    peers: BTreeMap<PeerId, Peer>,
    next_id: PeerId,
}

impl Registry {
    /// Register a peer unless the server is shutting down.
    pub(crate) fn insert(
        &mut self,
        addr: SocketAddr,
        writer: SharedWriter,
        shutdown: &CancellationToken,
    ) -> Option<PeerId> {
        if shutdown.is_cancelled() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.peers.insert(id, Peer { addr, writer });
        Some(id)
    }

    pub(crate) fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (PeerId, &Peer)> {
        self.peers.iter().map(|(id, peer)| (*id, peer))
    }

    /// Write `message` to every peer. Peers whose write fails are removed
    /// and closed; the others still receive it. Returns how many were dropped.
    pub(crate) async fn broadcast(&mut self, message: &Message) -> usize {
        let mut failed: Vec<PeerId> = Vec::new();
        for (id, peer) in self.iter() {
            if let Err(e) = peer.send(message.clone()).await {
                let e = Error::BroadcastWrite {
                    peer: peer.addr.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %e, "dropping peer");
                failed.push(id);
            }
        }

        let dropped = failed.len();
        for id in failed {
            if let Some(peer) = self.remove(id) {
                peer.close().await;
            }
        }
        dropped
    }

    /// Remove every peer.
    pub(crate) fn drain(&mut self) -> Vec<Peer> {
        std::mem::take(&mut self.peers).into_values().collect()
    }

    pub(crate) fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.values().map(|peer| peer.addr).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }
}
