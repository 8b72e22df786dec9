//! Reconnecting client demo
//!
//! Connects to a JSON-RPC peer, answers its `ping` calls and keeps issuing
//! requests while the link comes and goes. Requests made while the peer is
//! down are buffered and sent once it is reachable again.
//!
//! ```bash
//! cargo run --example reconnecting_client -- ws://127.0.0.1:9004
//! ```
//!
//! Stop and restart the peer to watch the backoff and the flush.

use std::time::Duration;
use tether::client::{ClientBuilder, PendingPolicy};
use tether::core::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9004".to_string());

    // console logging only; no collector needed
    let logging = ObservabilityConfig::new("tether-demo")
        .with_traces(false)
        .with_metrics(false)
        .with_log_level("info");
    tether::core::init_observability(logging)?;

    let client = ClientBuilder::new(url)
        .base_interval(Duration::from_millis(500))
        .max_interval(Duration::from_secs(5))
        .with_jitter()
        .request_timeout(Duration::from_secs(30))
        .pending_policy(PendingPolicy::KeepAcrossReconnect)
        .build()?;

    client.on_connect(|| println!("connected"));
    client.on_disconnect(|| println!("disconnected, will retry"));
    client.on_error(|e| println!("transport error: {e}"));

    let responder = client.clone();
    client.on_request(move |req| {
        if req.method == "ping" && !req.is_notification() {
            let _ = responder.respond(req.id.clone(), "pong");
        }
    });

    let mut counter = 1u64;
    loop {
        let state = client.state();
        match client.request::<_, String>("echo", [format!("message {counter}")]).await {
            Ok(reply) => println!("[{counter}] ({state}) {reply}"),
            Err(e) => println!("[{counter}] ({state}) error: {e}"),
        }
        counter += 1;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
