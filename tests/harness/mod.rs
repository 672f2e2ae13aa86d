//! Shared fixtures for the integration tests.
//!
//! [`TestServer`] runs a real [`wskit::Server`] on a random local port and
//! [`TestPeer`] is a bare connection that sees exactly what the server sends.

#![allow(dead_code)]

mod peer;
mod server;

pub use peer::TestPeer;
pub use server::TestServer;

use std::future::Future;
use std::time::Duration;

/// Generous bound for anything that should happen "soon".
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Await `future`, failing the test if it takes longer than [`PATIENCE`].
pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    match tokio::time::timeout(PATIENCE, future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
