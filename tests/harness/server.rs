//! A broadcast server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use wskit::{Server, ServerConfig};

use super::within;

pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    handle: JoinHandle<wskit::Result<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_at("127.0.0.1:0", ServerConfig::default()).await
    }

    /// Serve on a specific address, e.g. to come back on a port a previous
    /// server used.
    pub async fn spawn_at(addr: &str, config: ServerConfig) -> Self {
        let server = Arc::new(Server::with_config(config));
        let listener = server.bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let serving = server.clone();
        let handle = tokio::spawn(async move { serving.serve(listener).await });
        Self {
            server,
            addr,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, self.server.config().path)
    }

    /// Wait until exactly `count` peers are registered.
    pub async fn wait_for_peers(&self, count: usize) {
        within("registered peers", async {
            while self.server.connection_count().await != count {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
    }

    /// Close the server and wait for `serve` to return, releasing the port.
    pub async fn shutdown(self) {
        self.server.close().await;
        let served = within("serve to return", self.handle).await.unwrap();
        assert_eq!(served, Ok(()));
    }
}
