//! One persistent channel connection with bounded exponential-backoff
//! reconnect.
//!
//! State machine:
//! `Disconnected → Connecting → Open → Disconnected (retry scheduled) → ...`
//! until the retry budget is spent, after which the channel stays down until
//! [`Connection::connect`] is called again.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::frames::{self, DecodeError};
use super::transport::{Connector, Socket, TransportError};
use super::StreamError;
use crate::bus::{EventBus, StreamEvent};

/// Reconnect attempts after which a channel gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff (milliseconds).
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff (milliseconds).
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Delay before reconnect attempt `attempt` (1-indexed):
/// `min(1000 * 2^attempt, 30000)` ms.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt);
    let delay_ms = RECONNECT_BASE_DELAY_MS
        .saturating_mul(factor)
        .min(RECONNECT_MAX_DELAY_MS);
    Duration::from_millis(delay_ms)
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Metrics and tips, enveloped.
    Training,
    /// Chat messages, both directions.
    Agent,
}

impl Channel {
    /// Endpoint path relative to the websocket base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Channel::Training => "/ws/train",
            Channel::Agent => "/ws/agent",
        }
    }

    fn decode(&self, text: &str) -> Result<Option<StreamEvent>, DecodeError> {
        match self {
            Channel::Training => frames::decode_training_frame(text),
            Channel::Agent => frames::decode_agent_frame(text).map(|m| Some(StreamEvent::Chat(m))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Training => write!(f, "training"),
            Channel::Agent => write!(f, "agent"),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

struct Inner {
    state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    attempt: u32,
    /// Bumped on every connect attempt and on close; tasks carrying an older
    /// value are stale and must not touch state.
    generation: u64,
    exhausted: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

struct Shared {
    channel: Channel,
    url: String,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    inner: Mutex<Inner>,
}

enum DriveEnd {
    Shutdown,
    Closed,
}

/// Owns one logical channel: connects, decodes frames onto the bus and
/// reconnects on closure.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(
        channel: Channel,
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                url: url.into(),
                connector,
                bus,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    attempt: 0,
                    generation: 0,
                    exhausted: false,
                    outbound: None,
                    shutdown: None,
                    retry_timer: None,
                }),
            }),
        }
    }

    pub fn channel(&self) -> Channel {
        self.shared.channel
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Reconnect attempts made since the channel was last open.
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    /// True once the retry budget is spent and no retry is pending.
    pub fn is_exhausted(&self) -> bool {
        self.shared.lock().exhausted
    }

    /// Open the channel. No-op while already open or connecting.
    ///
    /// An explicit call resets the retry budget and cancels a pending retry.
    pub fn connect(&self) {
        let mut inner = self.shared.lock();
        if inner.state != ConnectionState::Disconnected {
            debug!("{} channel already {}", self.shared.channel, inner.state);
            return;
        }
        if let Some(timer) = inner.retry_timer.take() {
            timer.abort();
        }
        inner.attempt = 0;
        inner.exhausted = false;
        self.shared.start_attempt(&mut inner);
    }

    /// Send a chat message on the agent channel.
    ///
    /// Sending while not open drops the message, triggers a connect attempt
    /// and reports [`StreamError::NotConnected`]. Nothing is queued.
    pub fn send(&self, content: &str) -> Result<(), StreamError> {
        let channel = self.shared.channel;
        if channel != Channel::Agent {
            return Err(StreamError::SendUnsupported { channel });
        }
        let payload = frames::encode_chat(content)?;

        {
            let inner = self.shared.lock();
            if inner.state == ConnectionState::Open {
                if let Some(outbound) = inner.outbound.as_ref() {
                    if outbound.send(payload).is_ok() {
                        debug!("queued chat frame on {channel} channel");
                        return Ok(());
                    }
                }
            }
        }

        warn!("{channel} channel not connected; dropping chat message");
        self.connect();
        Err(StreamError::NotConnected { channel })
    }

    /// Close the channel and cancel any pending reconnect. No further retries
    /// happen until [`Connection::connect`] is called.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(timer) = inner.retry_timer.take() {
            timer.abort();
        }
        inner.outbound = None;
        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(());
        }
        if inner.state != ConnectionState::Disconnected {
            info!("{} channel closed", self.shared.channel);
        }
        inner.state = ConnectionState::Disconnected;
        inner.exhausted = false;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Connection")
            .field("channel", &self.shared.channel)
            .field("url", &self.shared.url)
            .field("state", &inner.state)
            .field("attempt", &inner.attempt)
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_attempt(self: &Arc<Self>, inner: &mut Inner) {
        inner.generation += 1;
        inner.state = ConnectionState::Connecting;
        inner.retry_timer = None;
        let generation = inner.generation;
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run(generation).await });
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let channel = self.channel;
        debug!("{channel} channel connecting to {}", self.url);

        let mut socket = match self.connector.connect(&self.url).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("{channel} channel failed to connect: {e}");
                self.on_closed(generation);
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let superseded = {
            let mut inner = self.lock();
            if inner.generation != generation {
                true
            } else {
                inner.state = ConnectionState::Open;
                inner.attempt = 0;
                inner.exhausted = false;
                inner.outbound = Some(outbound_tx);
                inner.shutdown = Some(shutdown_tx);
                false
            }
        };
        if superseded {
            debug!("{channel} channel closed while connecting");
            let _ = socket.close().await;
            return;
        }
        info!("{channel} channel connected");

        match self.drive(socket, outbound_rx, shutdown_rx).await {
            DriveEnd::Shutdown => debug!("{channel} channel driver stopped"),
            DriveEnd::Closed => {
                info!("{channel} channel disconnected");
                self.on_closed(generation);
            }
        }
    }

    async fn drive(
        &self,
        mut socket: Box<dyn Socket>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> DriveEnd {
        let channel = self.channel;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    if let Err(e) = socket.close().await {
                        debug!("{channel} channel close: {e}");
                    }
                    return DriveEnd::Shutdown;
                }
                Some(text) = outbound.recv() => {
                    if let Err(e) = socket.send(text).await {
                        warn!("{channel} channel send failed: {e}");
                        return DriveEnd::Closed;
                    }
                }
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(TransportError::InvalidFrame(reason))) => {
                        warn!("dropping malformed {channel} frame: {reason}");
                    }
                    Some(Err(e)) => {
                        warn!("{channel} channel read failed: {e}");
                        return DriveEnd::Closed;
                    }
                    None => return DriveEnd::Closed,
                },
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match self.channel.decode(text) {
            Ok(Some(event)) => {
                self.bus.publish(&event);
            }
            Ok(None) => {}
            Err(e) => warn!("dropping malformed {} frame: {e}", self.channel),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let channel = self.channel;
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        inner.outbound = None;
        inner.shutdown = None;

        if inner.attempt >= MAX_RECONNECT_ATTEMPTS {
            inner.exhausted = true;
            error!(
                "{channel} channel: giving up after {MAX_RECONNECT_ATTEMPTS} reconnect attempts"
            );
            return;
        }

        inner.attempt += 1;
        let attempt = inner.attempt;
        let delay = reconnect_delay(attempt);
        warn!(
            "{channel} channel reconnecting in {:?} (attempt {attempt}/{MAX_RECONNECT_ATTEMPTS})",
            delay
        );

        let shared = Arc::clone(self);
        inner.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.retry(generation);
        }));
    }

    fn retry(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Disconnected {
            return;
        }
        info!("attempting to reconnect {} channel", self.channel);
        self.start_attempt(&mut inner);
    }
}
