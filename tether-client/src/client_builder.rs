//! Client configuration
//!
//! `ClientBuilder` collects the reconnection, request and observability
//! settings before a [`TetherClient`] is created. Defaults:
//!
//! - exponential backoff: base 1000 ms, decay 1.5, max 10 000 ms, retry forever
//! - no request timeout
//! - outstanding requests are kept across reconnects
//! - no observability export
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, PendingPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:8080")
//!     .base_interval(Duration::from_millis(250))
//!     .max_interval(Duration::from_secs(5))
//!     .max_attempts(20)
//!     .request_timeout(Duration::from_secs(30))
//!     .pending_policy(PendingPolicy::RejectOnDisconnect)
//!     .connect()
//!     .await?;
//!
//! let sum: i64 = client.request("add", [2, 3]).await?;
//! # Ok(())
//! # }
//! ```

use crate::backoff::{
    ExponentialBackoff, NoReconnect, ReconnectionStrategy, DEFAULT_BASE_INTERVAL, DEFAULT_DECAY,
    DEFAULT_MAX_INTERVAL,
};
use crate::connector::{Connector, WsConnector};
use crate::metrics::ClientMetrics;
use crate::TetherClient;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Error, ObservabilityConfig, Result};

/// What happens to outstanding requests when an open link drops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Keep waiting; a response may still arrive after reconnection
    #[default]
    KeepAcrossReconnect,
    /// Fail every outstanding request with `Error::Disconnected`
    RejectOnDisconnect,
}

/// Builder for a [`TetherClient`]
pub struct ClientBuilder {
    url: String,
    base_interval: Duration,
    decay: f64,
    max_interval: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    strategy: Option<Box<dyn ReconnectionStrategy>>,
    request_timeout: Option<Duration>,
    pending_policy: PendingPolicy,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    connector: Option<Box<dyn Connector>>,
}

impl ClientBuilder {
    /// Start configuring a client for a WebSocket URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_interval: DEFAULT_BASE_INTERVAL,
            decay: DEFAULT_DECAY,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts: None,
            jitter: false,
            strategy: None,
            request_timeout: None,
            pending_policy: PendingPolicy::default(),
            observability_config: None,
            service_name: None,
            connector: None,
        }
    }

    /// Delay before the first retry
    pub fn base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Growth factor applied per consecutive failure
    pub fn decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    /// Upper bound on any single retry delay
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Close after this many consecutive failed attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Randomize retry delays by up to 25%
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Use a custom strategy instead of the configured backoff
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Close on the first connection loss instead of retrying
    pub fn without_reconnect(mut self) -> Self {
        self.strategy = Some(Box::new(NoReconnect));
        self
    }

    /// Fail every request that has no response after `timeout`
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Choose what happens to outstanding requests on disconnect
    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = policy;
        self
    }

    /// Enable OpenTelemetry export with a custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry export with the default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Service name reported to the collector (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Replace the WebSocket connector, e.g. with an in-memory one
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    fn build_strategy(&mut self) -> Box<dyn ReconnectionStrategy> {
        if let Some(strategy) = self.strategy.take() {
            return strategy;
        }
        let mut backoff = ExponentialBackoff::new(self.base_interval, self.decay, self.max_interval);
        if let Some(max) = self.max_attempts {
            backoff = backoff.with_max_attempts(max);
        }
        if self.jitter {
            backoff = backoff.with_jitter();
        }
        Box::new(backoff)
    }

    /// Create the client and start connecting in the background
    ///
    /// Must be called from within a tokio runtime. Requests issued before the
    /// connection opens are buffered.
    pub fn build(mut self) -> Result<TetherClient> {
        let metrics = match self.observability_config.take() {
            Some(mut config) => {
                if let Some(name) = self.service_name.take() {
                    config.service_name = name;
                }
                tether_core::init_observability(config.clone()).map_err(|e| {
                    Error::Internal(format!("Failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(ClientMetrics::new(config.service_name)))
            }
            None => None,
        };

        let strategy = self.build_strategy();
        let connector = self
            .connector
            .take()
            .unwrap_or_else(|| Box::new(WsConnector::new(self.url.clone())) as Box<dyn Connector>);

        tracing::info!(url = %self.url, policy = ?self.pending_policy, "Starting client");
        TetherClient::launch(
            connector,
            strategy,
            self.request_timeout,
            self.pending_policy,
            metrics,
        )
    }

    /// Create the client and wait until its first connection opens
    ///
    /// With a strategy that retries forever this waits until the peer is
    /// reachable. Fails with `Error::ConnectionClosed` if the strategy gives
    /// up first.
    pub async fn connect(self) -> Result<TetherClient> {
        let client = self.build()?;
        client.ready().await?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{Outcome, ScriptedConnector};
    use crate::channel::ConnectionState;

    #[test]
    fn test_defaults() {
        let mut builder = ClientBuilder::new("ws://localhost:8080");
        assert_eq!(builder.url, "ws://localhost:8080");
        assert_eq!(builder.pending_policy, PendingPolicy::KeepAcrossReconnect);
        assert!(builder.request_timeout.is_none());

        let mut strategy = builder.build_strategy();
        assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(1000)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_millis(2250)));
        assert!(strategy.next_delay(10_000).is_some());
    }

    #[test]
    fn test_backoff_settings_applied() {
        let mut builder = ClientBuilder::new("ws://localhost:8080")
            .base_interval(Duration::from_millis(100))
            .decay(2.0)
            .max_interval(Duration::from_millis(300))
            .max_attempts(3);

        let mut strategy = builder.build_strategy();
        assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_millis(300)));
        assert_eq!(strategy.next_delay(3), None);
    }

    #[test]
    fn test_without_reconnect() {
        let mut builder = ClientBuilder::new("ws://localhost:8080").without_reconnect();
        assert!(builder.build_strategy().next_delay(0).is_none());
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = ClientBuilder::new("ws://localhost:8080").build();
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_connect_with_custom_connector() {
        let client = ClientBuilder::new("memory://")
            .with_connector(ScriptedConnector::new([Outcome::Accept]))
            .connect()
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_connect_fails_when_strategy_gives_up() {
        let result = ClientBuilder::new("memory://")
            .with_connector(ScriptedConnector::default())
            .without_reconnect()
            .connect()
            .await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
