//! Self-healing outbound channel
//!
//! A [`BufferedChannel`] owns at most one physical [`Link`] at a time and
//! drives it through a small lifecycle:
//!
//! ```text
//!            connect ok                 link lost
//! Connecting ──────────► Open ─────────────────────► Disconnected
//!     ▲  │                                               │
//!     │  └──────────── connect failed ──────────────────►│
//!     └──────────────── backoff delay elapsed ───────────┘
//!
//! close() from any state, or the strategy giving up ───► Closed
//! ```
//!
//! # Buffering
//!
//! `send` never waits. While the channel is not Open, payloads are appended
//! to a FIFO buffer which is flushed, in order, the moment a link opens.
//! Payloads that were queued for a link but not yet written when it dropped
//! go back into the buffer. Closed is terminal: the buffer is discarded and
//! further sends fail with `Error::ConnectionClosed`.
//!
//! # Reconnection
//!
//! Every failed attempt (or lost link) consults the channel's
//! [`ReconnectionStrategy`] with the current attempt counter. The counter
//! grows by one per consecutive failure and returns to zero on reaching
//! Open, so the first retry after any success always waits the base delay.
//!
//! # Events
//!
//! - `connect` on reaching Open
//! - `disconnect` on leaving Open without `close()` being called
//! - `error` for every physical-layer failure, including failed attempts
//! - `close` once, on reaching Closed

use crate::backoff::ReconnectionStrategy;
use crate::connector::{Connector, Link};
use crate::metrics::ClientMetrics;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_core::{Emitter, Error, Result, TransportEvent};
use tokio::sync::{mpsc, watch};

/// Lifecycle state of a [`BufferedChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in progress (also the initial state)
    Connecting,
    /// A link is established and payloads are written immediately
    Open,
    /// The link was lost or an attempt failed; waiting out the backoff delay
    Disconnected,
    /// Terminal; no further attempts are made
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: ConnectionState,
    attempts: u32,
    buffer: VecDeque<String>,
    /// Queue feeding the current link's writer; only set while Open
    writer: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    events: Emitter<TransportEvent>,
    metrics: Option<Arc<ClientMetrics>>,
    started: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state` unless already Closed
    fn transition(&self, inner: &mut Inner, state: ConnectionState) -> bool {
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = state;
        self.state_tx.send_replace(state);
        if let Some(ref m) = self.metrics {
            m.update_connection_state(state);
        }
        true
    }

    /// Enter Closed; false if it already was
    fn shut(&self) -> bool {
        let mut inner = self.lock();
        if !self.transition(&mut inner, ConnectionState::Closed) {
            return false;
        }
        inner.buffer.clear();
        inner.writer = None;
        true
    }
}

/// Outbound payload channel that buffers while offline and reconnects with
/// backoff
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct BufferedChannel {
    shared: Arc<Shared>,
}

impl BufferedChannel {
    /// Create an idle channel in the Connecting state
    ///
    /// Nothing is attempted until [`start`](Self::start); payloads sent
    /// before then are buffered.
    pub fn new(events: Emitter<TransportEvent>, metrics: Option<Arc<ClientMetrics>>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Connecting,
                    attempts: 0,
                    buffer: VecDeque::new(),
                    writer: None,
                }),
                state_tx,
                events,
                metrics,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the connection driver on the current tokio runtime
    ///
    /// Every inbound payload is passed to `on_message` on the driver task.
    ///
    /// # Errors
    ///
    /// - `Error::Internal` outside a tokio runtime or on a second call
    /// - `Error::ConnectionClosed` if the channel was closed before starting
    pub fn start<C, F>(
        &self,
        connector: C,
        strategy: Box<dyn ReconnectionStrategy>,
        on_message: F,
    ) -> Result<()>
    where
        C: Connector,
        F: Fn(String) + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("no tokio runtime: {e}")))?;

        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("channel already started".to_string()));
        }
        if self.state() == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }

        let driver = Driver {
            shared: Arc::clone(&self.shared),
            connector: Box::new(connector),
            strategy,
            on_message: Box::new(on_message),
            state_rx: self.shared.state_tx.subscribe(),
            opened_before: false,
        };
        runtime.spawn(driver.run());
        Ok(())
    }

    /// Write `payload` now if Open, otherwise queue it
    ///
    /// Fails only once the channel is Closed.
    pub fn send(&self, payload: String) -> Result<()> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;

        let payload = match (inner.state, &inner.writer) {
            (ConnectionState::Closed, _) => return Err(Error::ConnectionClosed),
            (ConnectionState::Open, Some(writer)) => match writer.send(payload) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(payload)) => payload,
            },
            _ => payload,
        };

        inner.buffer.push_back(payload);
        tracing::trace!(buffered = inner.buffer.len(), state = %inner.state, "Payload buffered");
        drop(guard);

        if let Some(ref m) = self.shared.metrics {
            m.record_buffered();
        }
        Ok(())
    }

    /// Enter Closed and stop reconnecting
    ///
    /// Idempotent. The buffer is discarded, the current link (if any) is shut
    /// down and `close` is emitted on the first call only.
    pub fn close(&self) {
        if !self.shared.shut() {
            return;
        }
        tracing::info!("Channel closed");
        self.shared.events.emit(&TransportEvent::Close);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// True while Open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Consecutive failed attempts since the channel was last Open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    /// Number of payloads waiting for a link
    pub fn buffered_len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Lifecycle event emitter
    pub fn events(&self) -> &Emitter<TransportEvent> {
        &self.shared.events
    }

    /// Wait until the channel is Open
    ///
    /// Returns immediately if it already is. Fails with
    /// `Error::ConnectionClosed` if the channel closes first.
    pub async fn ready(&self) -> Result<()> {
        let mut state_rx = self.shared.state_tx.subscribe();
        let state = state_rx
            .wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed))
            .await
            .map(|s| *s)
            .map_err(|_| Error::ConnectionClosed)?;

        match state {
            ConnectionState::Open => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }
}

async fn wait_closed(state_rx: &mut watch::Receiver<ConnectionState>) {
    // the sender lives in Shared, which the driver keeps alive
    let _ = state_rx.wait_for(|s| *s == ConnectionState::Closed).await;
}

struct Driver {
    shared: Arc<Shared>,
    connector: Box<dyn Connector>,
    strategy: Box<dyn ReconnectionStrategy>,
    on_message: Box<dyn Fn(String) + Send + Sync>,
    state_rx: watch::Receiver<ConnectionState>,
    opened_before: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let attempt = {
                let mut inner = self.shared.lock();
                if !self.shared.transition(&mut inner, ConnectionState::Connecting) {
                    return;
                }
                inner.attempts
            };

            if self.opened_before || attempt > 0 {
                if let Some(ref m) = self.shared.metrics {
                    m.record_reconnection_attempt();
                }
            }
            tracing::debug!(attempt, "Connecting");

            let connecting = self.connector.connect();
            let outcome = tokio::select! {
                biased;
                _ = wait_closed(&mut self.state_rx) => return,
                outcome = connecting => outcome,
            };

            match outcome {
                Ok(link) => self.serve(link).await,
                Err(error) => {
                    tracing::warn!(error = %error, attempt, "Connection attempt failed");
                    self.report_error(error, "connect");
                    let mut inner = self.shared.lock();
                    if !self.shared.transition(&mut inner, ConnectionState::Disconnected) {
                        return;
                    }
                }
            }

            let attempt = {
                let inner = self.shared.lock();
                if inner.state == ConnectionState::Closed {
                    return;
                }
                inner.attempts
            };

            let Some(delay) = self.strategy.next_delay(attempt) else {
                self.give_up(attempt);
                return;
            };

            tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting");
            tokio::select! {
                biased;
                _ = wait_closed(&mut self.state_rx) => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut inner = self.shared.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.attempts = inner.attempts.saturating_add(1);
        }
    }

    /// Pump one link until it is lost or the channel closes
    async fn serve(&mut self, link: Link) {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let (writer, mut queue) = mpsc::unbounded_channel();

        let Some(flushed) = self.open(writer) else {
            let _ = sink.close().await;
            return;
        };

        self.strategy.reset();
        if self.opened_before {
            if let Some(ref m) = self.shared.metrics {
                m.record_reconnection_success();
            }
        }
        self.opened_before = true;
        tracing::info!(flushed, "Channel open");
        self.shared.events.emit(&TransportEvent::Connect);

        loop {
            tokio::select! {
                biased;
                _ = wait_closed(&mut self.state_rx) => {
                    if let Err(error) = sink.close().await {
                        tracing::debug!(error = %error, "Link did not close cleanly");
                    }
                    return;
                }
                Some(payload) = queue.recv() => {
                    if let Err(error) = sink.send(payload).await {
                        tracing::warn!(error = %error, "Write failed");
                        self.report_error(error, "write");
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => (self.on_message)(text),
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "Read failed");
                        self.report_error(error, "read");
                        break;
                    }
                    None => {
                        tracing::info!("Connection closed by peer");
                        break;
                    }
                },
            }
        }

        self.lost(queue);
    }

    /// Enter Open and flush the buffer into the new link's queue
    ///
    /// Returns the number of payloads flushed, or `None` if closed meanwhile.
    fn open(&self, writer: mpsc::UnboundedSender<String>) -> Option<usize> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.state == ConnectionState::Closed {
            return None;
        }

        let flushed = inner.buffer.len();
        for payload in inner.buffer.drain(..) {
            // the receiving half is held by serve()
            let _ = writer.send(payload);
        }
        inner.writer = Some(writer);
        inner.attempts = 0;
        self.shared.transition(inner, ConnectionState::Open);
        Some(flushed)
    }

    /// Leave Open after the link dropped, keeping anything not yet written
    fn lost(&self, mut queue: mpsc::UnboundedReceiver<String>) {
        let requeued = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.writer = None;
            let mut requeued = 0;
            while let Ok(payload) = queue.try_recv() {
                inner.buffer.push_back(payload);
                requeued += 1;
            }
            self.shared.transition(inner, ConnectionState::Disconnected);
            requeued
        };

        tracing::warn!(requeued, "Channel disconnected");
        self.shared.events.emit(&TransportEvent::Disconnect);
    }

    fn report_error(&self, error: Error, error_type: &str) {
        if let Some(ref m) = self.shared.metrics {
            m.record_error(error_type);
        }
        self.shared.events.emit(&TransportEvent::Error(error));
    }

    fn give_up(&self, attempts: u32) {
        if !self.shared.shut() {
            return;
        }
        tracing::error!(attempts, "Reconnection abandoned");
        self.report_error(Error::ReconnectExhausted { attempts }, "reconnect_exhausted");
        self.shared.events.emit(&TransportEvent::Close);
    }
}
