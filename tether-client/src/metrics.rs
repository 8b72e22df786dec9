//! OpenTelemetry instruments for the client
//!
//! Recorded only when the client was built with observability enabled; the
//! values are exported through whatever meter provider is installed globally
//! (see `tether_core::init_observability`).
//!
//! # Instruments
//!
//! - `tether.client.connection.state`: channel state as a gauge
//! - `tether.client.requests.total` / `tether.client.request.duration`
//! - `tether.client.errors.total`, keyed by `error_type`
//! - `tether.client.reconnection.attempts` / `tether.client.reconnection.success`
//! - `tether.client.inbound.requests`: calls initiated by the peer
//! - `tether.client.buffered.payloads`: sends queued while not Open
//! - `tether.client.discarded.messages`: undecodable or uncorrelated input

use crate::channel::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// Client instruments
pub struct ClientMetrics {
    /// Channel state (0=connecting, 1=open, 2=disconnected, 3=closed)
    pub connection_state: Gauge<i64>,
    /// Requests settled, by method and status
    pub requests_total: Counter<u64>,
    /// Time from send to settlement in seconds
    pub request_duration: Histogram<f64>,
    /// Errors, by type
    pub errors_total: Counter<u64>,
    /// Connection attempts after the first
    pub reconnection_attempts: Counter<u64>,
    /// Attempts after the first that reached Open
    pub reconnection_success: Counter<u64>,
    /// Requests and notifications received from the peer
    pub inbound_requests: Counter<u64>,
    /// Payloads queued while the channel was not Open
    pub buffered_payloads: Counter<u64>,
    /// Inbound messages dropped without effect
    pub discarded_messages: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter named after the service
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-supplied meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description("Channel state (0=connecting, 1=open, 2=disconnected, 3=closed)")
                .build(),
            requests_total: meter
                .u64_counter("tether.client.requests.total")
                .with_description("Requests settled")
                .build(),
            request_duration: meter
                .f64_histogram("tether.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("tether.client.reconnection.attempts")
                .with_description("Connection attempts after the first")
                .build(),
            reconnection_success: meter
                .u64_counter("tether.client.reconnection.success")
                .with_description("Reconnections that reached Open")
                .build(),
            inbound_requests: meter
                .u64_counter("tether.client.inbound.requests")
                .with_description("Requests and notifications received from the peer")
                .build(),
            buffered_payloads: meter
                .u64_counter("tether.client.buffered.payloads")
                .with_description("Payloads queued while not Open")
                .build(),
            discarded_messages: meter
                .u64_counter("tether.client.discarded.messages")
                .with_description("Inbound messages dropped without effect")
                .build(),
        }
    }

    /// Record a state transition
    pub fn update_connection_state(&self, state: ConnectionState) {
        let value = match state {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Disconnected => 2,
            ConnectionState::Closed => 3,
        };
        self.connection_state.record(value, &[]);
    }

    /// Record a settled request
    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    /// Record a reconnection attempt
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Record a successful reconnection
    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    /// Record a call initiated by the peer
    pub fn record_inbound(&self, method: &str) {
        self.inbound_requests
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    /// Record a payload queued for a later flush
    pub fn record_buffered(&self) {
        self.buffered_payloads.add(1, &[]);
    }

    /// Record a dropped inbound message
    pub fn record_discarded(&self, reason: &str) {
        self.discarded_messages
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}
