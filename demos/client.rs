//! Client that alternately sends `sms_code` and `voice_code` envelopes every
//! two seconds and logs whatever the server relays back.
//!
//! Run the server demo first, then `cargo run --example client`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wskit::Client;

#[derive(Debug, Deserialize)]
struct CodeData {
    code: String,
}

fn code_handler(kind: &'static str) -> impl Fn(&[u8]) + Send + Sync + 'static {
    move |data| match serde_json::from_slice::<CodeData>(data) {
        Ok(payload) => info!(kind, code = %payload.code, "received code"),
        Err(e) => warn!(kind, error = %e, "malformed payload"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = match Client::connect("ws://localhost:13785/ws").await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect");
            std::process::exit(1);
        }
    };
    client.register_route("sms_code", code_handler("sms"));
    client.register_route("voice_code", code_handler("voice"));

    let sender = client.clone();
    let sending = tokio::spawn(async move {
        let messages = [
            ("sms_code", json!({"code": "123456"})),
            ("voice_code", json!({"code": "654321"})),
        ];
        for (action, data) in messages.iter().cycle() {
            if let Err(e) = sender.send_envelope(action, data).await {
                warn!(action, error = %e, "send failed");
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    });

    let _ = tokio::signal::ctrl_c().await;
    sending.abort();
    if let Err(e) = client.close().await {
        warn!(error = %e, "error closing connection");
    }
}
