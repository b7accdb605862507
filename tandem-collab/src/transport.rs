//! Channel collaborators for a session.
//!
//! A [`Transport`] moves encoded [`ClientMessage`]s to the server and
//! reports channel lifecycle plus inbound frames as [`ChannelEvent`]s on
//! an unbounded receiver handed out when the transport is created. That
//! receiver is the subscription: dropping it unsubscribes every handler
//! at once.
//!
//! Two implementations:
//! - [`WsTransport`]: WebSocket client with backoff reconnection and
//!   heartbeat pings.
//! - [`MemoryTransport`]: records outbound messages in memory, for tests
//!   and embedding behind another channel.

use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Lifecycle and data events delivered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// One raw inbound text frame.
    Message(String),
}

/// Subscription to a transport's [`ChannelEvent`]s.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Outbound half of the channel.
///
/// `send` is fire-and-forget: `Ok` means the message was handed to the
/// channel, not that the server has seen it.
pub trait Transport {
    /// Start connecting. Progress is reported as events.
    fn connect(&mut self) -> Result<(), TransportError>;
    /// Close the channel and stop any reconnection.
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory transport
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    fail_sends: bool,
    closed: bool,
    connect_calls: usize,
    sent: Vec<ClientMessage>,
}

/// Transport that keeps everything in memory.
///
/// The paired [`MemoryRemote`] plays the server side: it flips the channel
/// up and down, injects inbound frames and inspects what was sent.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

/// Server-side controls for a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryRemote, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MemoryState::default()));
        let transport = Self {
            state: state.clone(),
            events: events.clone(),
        };
        (transport, MemoryRemote { state, events }, rx)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;
        state.closed = false;
        let _ = self.events.send(ChannelEvent::Connecting);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.connected = false;
        state.closed = true;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_sends {
            return Err(TransportError::Rejected("injected failure".to_string()));
        }
        state.sent.push(message.clone());
        Ok(())
    }
}

impl MemoryRemote {
    /// Bring the channel up and emit `Connected`.
    pub fn open(&self) {
        lock(&self.state).connected = true;
        let _ = self.events.send(ChannelEvent::Connected);
    }

    /// Drop the channel and emit `Reconnecting`.
    pub fn drop_connection(&self) {
        lock(&self.state).connected = false;
        let _ = self.events.send(ChannelEvent::Reconnecting);
    }

    /// Drop the channel for good and emit `Disconnected`.
    pub fn close(&self) {
        lock(&self.state).connected = false;
        let _ = self.events.send(ChannelEvent::Disconnected);
    }

    /// Emit an arbitrary lifecycle or data event.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Deliver an inbound message as a text frame.
    pub fn deliver(&self, message: &ServerMessage) {
        match message.encode() {
            Ok(text) => self.emit(ChannelEvent::Message(text)),
            Err(e) => log::error!("Failed to encode test frame: {e}"),
        }
    }

    /// Make every subsequent send fail while the channel stays up.
    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut lock(&self.state).sent)
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.state).connect_calls
    }

    /// Whether the local side has closed the channel.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

// ───────────────────────────────────────────────────────────────────
// WebSocket transport
// ───────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connection pump returned.
enum PumpEnd {
    /// The socket closed or errored; try again.
    Lost,
    /// The owner is gone; stop for good.
    Shutdown,
}

/// WebSocket client transport.
///
/// `connect` spawns one background task that dials, pumps frames, and
/// redials with exponential backoff after a loss. `disconnect` (or drop)
/// aborts that task, so no timer or retry loop outlives the transport.
pub struct WsTransport {
    config: TransportConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    connected: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            config,
            events,
            outgoing: None,
            connected: Arc::new(AtomicBool::new(false)),
            task: None,
        };
        (transport, rx)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Rejected(format!("no async runtime: {e}")))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(out_tx);
        self.task = Some(runtime.spawn(connection_loop(
            self.config.clone(),
            self.events.clone(),
            out_rx,
            self.connected.clone(),
        )));
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::info!("Closed channel to {}", self.config.url);
        }
        self.outgoing = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        let text = message
            .encode()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        outgoing.send(text).map_err(|_| TransportError::Closed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Dial, pump, back off, repeat.
async fn connection_loop(
    config: TransportConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if events.send(ChannelEvent::Connecting).is_err() {
            return;
        }

        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                // Frames queued against the previous socket died with it.
                while outgoing.try_recv().is_ok() {}

                connected.store(true, Ordering::SeqCst);
                log::info!("Connected to {}", config.url);
                if events.send(ChannelEvent::Connected).is_err() {
                    connected.store(false, Ordering::SeqCst);
                    return;
                }

                let end = pump(stream, &config, &events, &mut outgoing).await;
                connected.store(false, Ordering::SeqCst);

                if let PumpEnd::Shutdown = end {
                    let _ = events.send(ChannelEvent::Disconnected);
                    return;
                }
                log::warn!("Connection to {} lost", config.url);
                if events.send(ChannelEvent::Reconnecting).is_err() {
                    return;
                }
            }
            Err(e) => log::warn!("Connect to {} failed: {e}", config.url),
        }

        attempt += 1;
        if config.max_attempts.is_some_and(|max| attempt >= max) {
            log::error!("Giving up on {} after {attempt} attempts", config.url);
            let _ = events.send(ChannelEvent::Disconnected);
            return;
        }

        let delay = config.backoff(attempt);
        log::debug!("Reconnecting to {} in {delay:?}", config.url);
        tokio::time::sleep(delay).await;
    }
}

async fn pump(
    stream: WsStream,
    config: &TransportConfig,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
) -> PumpEnd {
    let (mut writer, mut reader) = stream.split();
    let mut heartbeat = (config.heartbeat_interval_secs > 0).then(|| {
        let period = Duration::from_secs(config.heartbeat_interval_secs);
        interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(ChannelEvent::Message(text.as_str().to_owned())).is_err() {
                        let _ = writer.send(Message::Close(None)).await;
                        return PumpEnd::Shutdown;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("WebSocket error from {}: {e}", config.url);
                    return PumpEnd::Lost;
                }
            },
            outbound = outgoing.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        log::warn!("Write to {} failed: {e}", config.url);
                        return PumpEnd::Lost;
                    }
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    return PumpEnd::Shutdown;
                }
            },
            _ = tick(&mut heartbeat) => {
                if writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return PumpEnd::Lost;
                }
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}
