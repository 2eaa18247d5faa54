//! WebSocket transport to the metrics endpoint.
//!
//! A [`MetricsClient`] keeps at most one live connection. Each connection is
//! owned by a spawned task that reads frames, writes queued messages and
//! sends the heartbeat. Lifecycle changes and decoded frames are published on
//! the client's [`EventBus`]; nothing is returned to the caller as an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::bus::{Event, EventBus};
use crate::protocol::{self, OutboundMessage};
use crate::types::ConnectionState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const METRICS_PATH: &str = "/ws/metrics";
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when a connection ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Reported when the peer's close frame carries no status code.
pub const NO_STATUS: u16 = 1005;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(30_000);
const CLOSE_GRACE: Duration = Duration::from_secs(5);
const CLIENT_DISCONNECT: &str = "Client disconnect";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection task is gone")]
    ChannelClosed,
    #[error("connection lost (code {code}): {reason}")]
    ConnectionLost { code: u16, reason: String },
    #[error("scheme `{0}` cannot carry the metrics endpoint")]
    UnsupportedScheme(String),
}

/// Live endpoint for an origin: `/ws/metrics` with `http→ws`, `https→wss`.
/// `ws`/`wss` URLs keep their scheme.
pub fn metrics_endpoint(origin: &Url) -> Result<Url, TransportError> {
    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    let mut url = origin.clone();
    url.set_scheme(scheme)
        .map_err(|_| TransportError::UnsupportedScheme(origin.scheme().to_string()))?;
    url.set_path(METRICS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(5_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `base_interval * 2^(attempt - 1)`, attempts counted from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_interval.saturating_mul(factor)
    }
}

/// Attempt counter for reconnect scheduling. Gives up at the ceiling
/// rather than capping the delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count one more attempt and return its delay, or `None` once the
    /// ceiling has been reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: Url,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Duration,
}

impl ClientOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectPolicy::default(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

enum Outbound {
    Text(String),
    Close,
}

// Connection state, its outbound queue and its task change together.
struct Link {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
    // connect() arrived while closing; reopen once the old link is down
    reopen: bool,
}

struct Shared {
    options: ClientOptions,
    bus: EventBus,
    link: Mutex<Link>,
    should_reconnect: AtomicBool,
    backoff: Mutex<Backoff>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the live metrics channel. Clones share one connection.
#[derive(Clone)]
pub struct MetricsClient {
    shared: Arc<Shared>,
}

impl MetricsClient {
    pub fn new(options: ClientOptions, bus: EventBus) -> Self {
        let backoff = Backoff::new(options.reconnect);
        Self {
            shared: Arc::new(Shared {
                options,
                bus,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    outbound: None,
                    task: None,
                    reopen: false,
                }),
                should_reconnect: AtomicBool::new(true),
                backoff: Mutex::new(backoff),
                reconnect_timer: Mutex::new(None),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn url(&self) -> &Url {
        &self.shared.options.url
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.link).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.shared.backoff).attempts()
    }

    /// Open the connection unless one is open or being opened. While a
    /// previous connection is still closing the open is deferred until that
    /// close completes.
    ///
    /// After [`disconnect`](Self::disconnect) this starts a fresh session:
    /// automatic reconnection is re-armed and the attempt count starts over.
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        if !self.shared.should_reconnect.swap(true, Ordering::SeqCst) {
            lock(&self.shared.backoff).reset();
        }
        self.shared.open();
    }

    /// Close with a normal-closure code and stop reconnecting.
    pub fn disconnect(&self) {
        self.shared.should_reconnect.store(false, Ordering::SeqCst);
        if let Some(timer) = lock(&self.shared.reconnect_timer).take() {
            timer.abort();
        }

        let mut link = lock(&self.shared.link);
        match link.state {
            ConnectionState::Connected => {
                link.state = ConnectionState::Closing;
                if let Some(tx) = &link.outbound {
                    let _ = tx.send(Outbound::Close);
                }
                info!("closing metrics connection");
            }
            ConnectionState::Connecting => {
                if let Some(task) = link.task.take() {
                    task.abort();
                }
                link.state = ConnectionState::Disconnected;
                drop(link);
                info!("connection attempt cancelled");
                self.shared.bus.emit(&Event::Disconnected {
                    code: NORMAL_CLOSURE,
                    reason: CLIENT_DISCONNECT.into(),
                    timestamp: Utc::now(),
                });
            }
            ConnectionState::Closing => link.reopen = false,
            ConnectionState::Disconnected => {}
        }
    }

    pub fn try_send<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        self.shared.try_send(message)
    }

    /// Queue `message` on the live connection. Returns `false` when it could
    /// not be encoded or the channel is not open.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        self.shared.send(message)
    }

    pub fn ping(&self) -> bool {
        self.send(&OutboundMessage::ping())
    }

    /// Ask the server for an immediate full-overview push.
    pub fn request_update(&self) -> bool {
        self.send(&OutboundMessage::request_update())
    }
}

impl std::fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsClient")
            .field("url", &self.shared.options.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn open(self: &Arc<Self>) {
        let mut link = lock(&self.link);
        match link.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Closing => {
                debug!("connect deferred until close completes");
                link.reopen = true;
                return;
            }
            state => {
                debug!(%state, "connect ignored");
                return;
            }
        }
        link.state = ConnectionState::Connecting;
        let shared = Arc::clone(self);
        link.task = Some(tokio::spawn(async move { shared.run_connection().await }));
    }

    fn try_send<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        let link = lock(&self.link);
        if link.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(link.state));
        }
        let tx = link.outbound.as_ref().ok_or(TransportError::ChannelClosed)?;
        tx.send(Outbound::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn send<T: Serialize>(&self, message: &T) -> bool {
        match self.try_send(message) {
            Ok(()) => true,
            Err(e @ TransportError::NotConnected(_)) => {
                debug!(error = %e, "message not sent");
                false
            }
            Err(e) => {
                warn!(error = %e, "message not sent");
                false
            }
        }
    }

    async fn run_connection(self: Arc<Self>) {
        let url = self.options.url.as_str().to_string();
        info!(%url, "connecting to metrics endpoint");

        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(source) => {
                let err = TransportError::Connect { url, source };
                {
                    let mut link = lock(&self.link);
                    if link.state != ConnectionState::Connecting {
                        return;
                    }
                    link.state = ConnectionState::Disconnected;
                    link.task = None;
                }
                warn!(error = %err, "metrics endpoint unreachable");
                self.bus.emit(&Event::error(err.to_string()));
                self.bus.emit(&Event::Disconnected {
                    code: ABNORMAL_CLOSURE,
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
                self.schedule_reconnect();
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let opened = {
            let mut link = lock(&self.link);
            if link.state == ConnectionState::Connecting {
                link.state = ConnectionState::Connected;
                link.outbound = Some(tx);
                true
            } else {
                false
            }
        };
        if !opened {
            // disconnect() won the race; leave quietly.
            let mut ws = ws;
            let _ = ws.close(None).await;
            return;
        }
        lock(&self.backoff).reset();
        info!(%url, "metrics connection open");
        self.bus.emit(&Event::Connected {
            timestamp: Utc::now(),
        });

        let (code, reason) = self.pump(ws, &mut rx).await;

        let reopen = {
            let mut link = lock(&self.link);
            link.state = ConnectionState::Disconnected;
            link.outbound = None;
            link.task = None;
            std::mem::take(&mut link.reopen)
        };
        if code == NORMAL_CLOSURE {
            info!(code, %reason, "metrics connection closed");
        } else {
            let lost = TransportError::ConnectionLost {
                code,
                reason: reason.clone(),
            };
            warn!(error = %lost, "metrics connection dropped");
        }
        self.bus.emit(&Event::Disconnected {
            code,
            reason,
            timestamp: Utc::now(),
        });
        if reopen {
            info!("reopening metrics connection");
            self.open();
        } else if code != NORMAL_CLOSURE {
            self.schedule_reconnect();
        }
    }

    // Runs until the connection ends; returns the close code and reason.
    async fn pump(
        &self,
        mut ws: WsStream,
        rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> (u16, String) {
        let period = self.options.heartbeat;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.dispatch(text),
                        Err(e) => warn!(error = %e, "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = close_details(frame);
                        drain(&mut ws).await;
                        return (code, reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return (ABNORMAL_CLOSURE, e.to_string()),
                    None => return (ABNORMAL_CLOSURE, "stream ended".into()),
                },
                cmd = rx.recv() => match cmd {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws.send(Message::Text(text)).await {
                            return (ABNORMAL_CLOSURE, e.to_string());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: CLIENT_DISCONNECT.into(),
                        };
                        if let Err(e) = ws.close(Some(frame)).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        drain(&mut ws).await;
                        return (NORMAL_CLOSURE, CLIENT_DISCONNECT.into());
                    }
                },
                _ = heartbeat.tick() => {
                    self.send(&OutboundMessage::ping());
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match protocol::decode(text) {
            Ok(message) => {
                self.bus.emit(&Event::from(message));
            }
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.should_reconnect.load(Ordering::SeqCst) {
            debug!("reconnect disabled");
            return;
        }
        let (attempt, delay) = {
            let mut backoff = lock(&self.backoff);
            match backoff.next_delay() {
                Some(delay) => (backoff.attempts(), delay),
                None => {
                    // next connect() starts a fresh attempt count
                    self.should_reconnect.store(false, Ordering::SeqCst);
                    warn!(
                        max_attempts = self.options.reconnect.max_attempts,
                        "giving up on reconnecting; connect() again to retry"
                    );
                    return;
                }
            }
        };
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.bus.emit(&Event::Reconnecting { attempt, delay });

        let shared = Arc::clone(self);
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            if shared.should_reconnect.load(Ordering::SeqCst) {
                shared.open();
            }
        });
        if let Some(previous) = lock(&self.reconnect_timer).replace(timer) {
            previous.abort();
        }
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    match frame {
        Some(f) => (u16::from(f.code), f.reason.into_owned()),
        None => (NO_STATUS, String::new()),
    }
}

// Let tungstenite finish the closing handshake, bounded by CLOSE_GRACE.
async fn drain(ws: &mut WsStream) {
    let _ = timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_follows_origin_scheme() {
        let ws = metrics_endpoint(&Url::parse("http://dash.local:8000/some/page?x=1").unwrap()).unwrap();
        assert_eq!(ws.as_str(), "ws://dash.local:8000/ws/metrics");
        let wss = metrics_endpoint(&Url::parse("https://dash.example.com").unwrap()).unwrap();
        assert_eq!(wss.as_str(), "wss://dash.example.com/ws/metrics");
        assert!(matches!(
            metrics_endpoint(&Url::parse("ftp://host").unwrap()),
            Err(TransportError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn delays_double_from_the_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(20_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(80_000));
    }

    #[test]
    fn backoff_stops_at_the_ceiling() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            [5, 10, 20, 40, 80].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff.attempts(), 5);
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn send_fails_quietly_when_not_connected() {
        let client = MetricsClient::new(
            ClientOptions::new(Url::parse("ws://127.0.0.1:9/ws/metrics").unwrap()),
            EventBus::new(),
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.send(&OutboundMessage::ping()));
        assert!(!client.ping());
        assert!(!client.request_update());
        assert!(matches!(
            client.try_send(&OutboundMessage::ping()),
            Err(TransportError::NotConnected(ConnectionState::Disconnected))
        ));
    }

    #[test]
    fn disconnect_when_idle_is_a_no_op() {
        let client = MetricsClient::new(
            ClientOptions::new(Url::parse("ws://127.0.0.1:9/ws/metrics").unwrap()),
            EventBus::new(),
        );
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
