//! Broadcast server on port 13785.
//!
//! Run with `cargo run --example server`, then start one or more clients.

use tracing_subscriber::EnvFilter;
use wskit::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = Server::new();
    tokio::select! {
        served = server.start("0.0.0.0:13785") => {
            if let Err(e) = served {
                tracing::error!(error = %e, "server failed to start");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            server.close().await;
        }
    }
}
