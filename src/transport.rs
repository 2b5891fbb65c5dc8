//! WebSocket transport: connection lifecycle, reconnects, frame codec.
//!
//! ## Design
//! - One tokio task owns the socket ([`Transport::run`]).
//! - Outbound requests arrive on an unbounded mpsc channel fed by
//!   [`TransportHandle::send`]; decoded inbound fragments leave on a bounded
//!   mpsc channel.
//! - The current [`ConnectionState`] is published on a `watch` channel so the
//!   controller can gate submission without awaiting anything.
//! - Frames that do not decode as JSON fragments are logged and dropped here,
//!   before they reach the reconciler.
//!
//! ## Lifecycle
//! 1. `Connecting` → handshake (bounded by the connect timeout)
//! 2. `Open` → multiplex socket frames and outbound requests
//! 3. `Closed` on any socket close or error → ask the [`ReconnectPolicy`] for a
//!    delay, sleep, go to 1. Requests sent meanwhile are queued.
//! 4. All handles dropped, in any state → `Closing` → close frame (if a socket
//!    is open) → `Closed`, `run` returns `Ok(())`

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, TransportError};
use crate::message::{InboundFragment, OutboundRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default capacity of the inbound fragment channel.
pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

/// Buffered state transitions per subscriber before it lags.
const TRANSITION_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Health of the underlying connection, as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Uninstantiated => write!(f, "Uninstantiated"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Decides whether and when to reconnect after the connection is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Retry forever at a fixed interval.
    Always { interval: Duration },
    /// Exponential backoff `min(base * 2^(attempt-1), max)`, giving up after
    /// `max_attempts` consecutive failures.
    Bounded {
        max_attempts: u32,
        base: Duration,
        max: Duration,
    },
    /// Never reconnect: the first close ends the transport.
    Never,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Always {
            interval: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// to give up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Always { interval } => Some(*interval),
            ReconnectPolicy::Bounded {
                max_attempts,
                base,
                max,
            } => {
                if attempt > *max_attempts {
                    return None;
                }
                let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                Some(base.checked_mul(factor).unwrap_or(*max).min(*max))
            }
            ReconnectPolicy::Never => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// Decode one inbound text frame. Undecodable frames are logged and dropped.
pub fn decode_frame(text: &str) -> Option<InboundFragment> {
    match serde_json::from_str::<InboundFragment>(text) {
        Ok(fragment) => Some(fragment),
        Err(e) => {
            warn!(error = %e, frame_len = text.len(), "dropping undecodable frame");
            None
        }
    }
}

/// Encode an outbound request as a JSON text payload.
pub fn encode_request(request: &OutboundRequest) -> Result<String, TransportError> {
    Ok(serde_json::to_string(request)?)
}

// ---------------------------------------------------------------------------
// Config, handle, builder
// ---------------------------------------------------------------------------

/// Runtime settings for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub endpoint: String,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
    pub inbound_capacity: usize,
}

impl TransportConfig {
    /// A config with defaults: reconnect always every 5 s, 10 s connect
    /// timeout, inbound capacity 256.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

/// Cheap, cloneable access to a running transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<OutboundRequest>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl TransportHandle {
    /// Queue a request for the socket. Requests queued while disconnected go
    /// out after the next successful open.
    ///
    /// # Errors
    /// [`ChatError::TransportClosed`] once the transport task has exited.
    pub fn send(&self, request: OutboundRequest) -> Result<(), ChatError> {
        self.outbound
            .send(request)
            .map_err(|_| ChatError::TransportClosed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A fresh receiver for state changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Every state change after this call, in order. Unlike
    /// [`watch`](Self::watch), nothing is coalesced, so a subscriber sees
    /// `Closing` even when `Closed` follows immediately.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// True once the transport task has exited.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Builder for [`Transport`].
pub struct TransportBuilder {
    config: TransportConfig,
}

impl TransportBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: TransportConfig::new(endpoint),
        }
    }

    pub fn from_config(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// Construct the transport, a handle to it, and the receiver for decoded
    /// fragments. Nothing connects until [`Transport::run`] is polled.
    pub fn build(
        self,
    ) -> (
        Transport,
        TransportHandle,
        mpsc::Receiver<InboundFragment>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninstantiated);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CAPACITY);

        let transport = Transport {
            config: self.config,
            outbound_rx,
            inbound_tx,
            state_tx,
            transitions_tx: transitions_tx.clone(),
            unsent: VecDeque::new(),
        };
        let handle = TransportHandle {
            outbound: outbound_tx,
            state: state_rx,
            transitions: transitions_tx,
        };
        (transport, handle, inbound_rx)
    }
}

// ---------------------------------------------------------------------------
// Transport runner
// ---------------------------------------------------------------------------

enum SessionExit {
    /// The socket went away; the policy decides what happens next.
    Dropped,
    /// Every consumer is gone; stop for good.
    Shutdown,
}

/// The connection owner. Spawn [`run`](Self::run) on a tokio runtime.
pub struct Transport {
    config: TransportConfig,
    outbound_rx: mpsc::UnboundedReceiver<OutboundRequest>,
    inbound_tx: mpsc::Sender<InboundFragment>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    /// Requests received while disconnected, or whose write failed; sent
    /// first, in order, on the next open.
    unsent: VecDeque<OutboundRequest>,
}

impl Transport {
    pub fn builder(endpoint: impl Into<String>) -> TransportBuilder {
        TransportBuilder::new(endpoint)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect, serve, and reconnect until shut down or the policy gives up.
    ///
    /// # Returns
    /// - `Ok(())` when every handle or the inbound receiver is dropped, or
    ///   when [`ReconnectPolicy::Never`] sees its single session close.
    /// - `Err(TransportError::ReconnectExhausted)` when a bounded policy runs
    ///   out of attempts.
    /// - The last connect error when [`ReconnectPolicy::Never`] fails its
    ///   only handshake.
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                result = connect(&self.config) => result,
                _ = hold_until_released(&mut self.outbound_rx, &mut self.unsent) => {
                    debug!("all transport handles dropped while connecting");
                    self.shut_down_idle();
                    return Ok(());
                }
            };

            let (exit, last_error) = match attempt {
                Ok(ws) => {
                    failures = 0;
                    self.set_state(ConnectionState::Open);
                    (self.session(ws).await, None)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        url = %self.config.endpoint,
                        "connection attempt failed"
                    );
                    (SessionExit::Dropped, Some(e))
                }
            };

            self.set_state(ConnectionState::Closed);
            if let SessionExit::Shutdown = exit {
                return Ok(());
            }

            failures = failures.saturating_add(1);
            let Some(delay) = self.config.reconnect.next_delay(failures) else {
                return match self.config.reconnect {
                    ReconnectPolicy::Never => last_error.map_or(Ok(()), Err),
                    _ => {
                        error!(
                            url = %self.config.endpoint,
                            consecutive_failures = failures,
                            "reconnect policy exhausted, giving up"
                        );
                        Err(TransportError::ReconnectExhausted {
                            attempts: failures.saturating_sub(1),
                        })
                    }
                };
            };

            info!(
                url = %self.config.endpoint,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.inbound_tx.closed() => {
                    debug!("inbound receiver dropped while waiting to reconnect");
                    return Ok(());
                }
                _ = hold_until_released(&mut self.outbound_rx, &mut self.unsent) => {
                    debug!("all transport handles dropped while waiting to reconnect");
                    self.shut_down_idle();
                    return Ok(());
                }
            }
        }
    }

    /// Serve one open connection until it drops or the transport shuts down.
    async fn session(&mut self, ws: WsStream) -> SessionExit {
        let (mut sink, mut stream) = ws.split();

        while let Some(request) = self.unsent.pop_front() {
            if !self.write(&mut sink, request).await {
                return SessionExit::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let Some(fragment) = decode_frame(&text) else {
                                continue;
                            };
                            if self.inbound_tx.send(fragment).await.is_err() {
                                debug!("inbound receiver dropped, shutting down");
                                self.close(&mut sink).await;
                                return SessionExit::Shutdown;
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(close_frame = ?frame, "server closed connection");
                            return SessionExit::Dropped;
                        }
                        Some(Ok(_)) => {} // Binary / ping / pong frames carry no fragments
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read failed");
                            return SessionExit::Dropped;
                        }
                        None => return SessionExit::Dropped,
                    }
                }

                request = self.outbound_rx.recv() => {
                    match request {
                        Some(request) => {
                            if !self.write(&mut sink, request).await {
                                return SessionExit::Dropped;
                            }
                        }
                        None => {
                            debug!("all transport handles dropped, shutting down");
                            self.close(&mut sink).await;
                            return SessionExit::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Write one request. Returns `false` when the socket failed; the request
    /// is then kept for the next connection.
    async fn write<S>(&mut self, sink: &mut S, request: OutboundRequest) -> bool
    where
        S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let text = match encode_request(&request) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, message_id = %request.message_id, "dropping outbound request");
                return true;
            }
        };
        match sink.send(WsMessage::Text(text)).await {
            Ok(()) => {
                debug!(message_id = %request.message_id, "request sent");
                true
            }
            Err(e) => {
                warn!(error = %e, message_id = %request.message_id, "websocket write failed");
                self.unsent.push_front(request);
                false
            }
        }
    }

    async fn close<S>(&self, sink: &mut S)
    where
        S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        self.set_state(ConnectionState::Closing);
        if let Err(e) = sink.close().await {
            debug!(error = %e, "error while closing websocket");
        }
    }

    /// Shutdown with no socket to close.
    fn shut_down_idle(&self) {
        self.set_state(ConnectionState::Closing);
        self.set_state(ConnectionState::Closed);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            let _ = self.transitions_tx.send(state);
            info!(status = %state, url = %self.config.endpoint, "connection status changed");
        }
    }
}

async fn connect(config: &TransportConfig) -> Result<WsStream, TransportError> {
    let url = config.endpoint.clone();
    let handshake = tokio_tungstenite::connect_async(url.as_str());
    match tokio::time::timeout(config.connect_timeout, handshake).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(TransportError::Connect {
            url,
            detail: e.to_string(),
        }),
        Err(_) => Err(TransportError::Timeout {
            url,
            timeout_ms: config.connect_timeout.as_millis() as u64,
        }),
    }
}

/// Queue requests that arrive while there is no socket. Resolves once every
/// handle has been dropped.
async fn hold_until_released(
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundRequest>,
    unsent: &mut VecDeque<OutboundRequest>,
) {
    while let Some(request) = outbound_rx.recv().await {
        debug!(message_id = %request.message_id, "queued request until reconnect");
        unsent.push_back(request);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
