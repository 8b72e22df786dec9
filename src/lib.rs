//! Tether - resilient JSON-RPC 2.0 over a reconnecting channel
//!
//! This is the convenience crate that re-exports the tether sub-crates.
//! Use it if you want a single dependency.
//!
//! # Architecture
//!
//! - **tether-core**: wire types, codec, errors, event emitter, observability
//! - **tether-client**: buffered reconnecting channel, request correlation,
//!   the client facade and its builder
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::TetherClient;
//! use tether::client::ClientBuilder;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client: TetherClient = ClientBuilder::new("ws://localhost:8080")
//!         .request_timeout(Duration::from_secs(10))
//!         .connect()
//!         .await?;
//!
//!     let result: serde_json::Value = client
//!         .request("add", serde_json::json!({"a": 5, "b": 3}))
//!         .await?;
//!     println!("Result: {}", result);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

pub use tether_client as client;
pub use tether_core as core;

pub use tether_client::{ClientBuilder, TetherClient};
pub use tether_core::{Error, Result};
