//! In-process publish/subscribe between the transport and its consumers.
//!
//! Handlers are registered per [`EventKind`]. A handler's identity is its
//! `Arc` allocation: registering the same `Arc` twice keeps one entry.
//! Dispatch order is unspecified. A panicking handler is logged and the
//! remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::error;

use crate::protocol::{InboundMessage, MetricsUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Reconnecting,
    MetricsUpdate,
    ConnectionEstablished,
    Heartbeat,
    ServerError,
    Message,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::Reconnecting => "reconnecting",
            EventKind::MetricsUpdate => "metrics_update",
            EventKind::ConnectionEstablished => "connection_established",
            EventKind::Heartbeat => "heartbeat",
            EventKind::ServerError => "server_error",
            EventKind::Message => "message",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Connected {
        timestamp: DateTime<Utc>,
    },
    Disconnected {
        code: u16,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Transport-level failure, e.g. the endpoint could not be reached.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    MetricsUpdate(MetricsUpdate),
    ConnectionEstablished {
        message: Option<String>,
    },
    Heartbeat(Value),
    /// An `error` frame sent by the server.
    ServerError {
        message: String,
        payload: Value,
    },
    /// A frame with an `event_type` this client does not know.
    Message(Value),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Error { .. } => EventKind::Error,
            Event::Reconnecting { .. } => EventKind::Reconnecting,
            Event::MetricsUpdate(_) => EventKind::MetricsUpdate,
            Event::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            Event::Heartbeat(_) => EventKind::Heartbeat,
            Event::ServerError { .. } => EventKind::ServerError,
            Event::Message(_) => EventKind::Message,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<InboundMessage> for Event {
    fn from(msg: InboundMessage) -> Self {
        match msg {
            InboundMessage::MetricsUpdate(update) => Event::MetricsUpdate(update),
            InboundMessage::ConnectionEstablished { message, .. } => {
                Event::ConnectionEstablished { message }
            }
            InboundMessage::Heartbeat(payload) => Event::Heartbeat(payload),
            InboundMessage::Error { message, payload } => Event::ServerError {
                message: message.unwrap_or_else(|| "server reported an error".into()),
                payload,
            },
            InboundMessage::Other { payload, .. } => Event::Message(payload),
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Wrap a closure as a [`Handler`]. Keep the returned `Arc` to unsubscribe.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<EventKind, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Handler>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on(&self, kind: EventKind, handler: &Handler) {
        let mut listeners = self.lock();
        let set = listeners.entry(kind).or_default();
        if !set.iter().any(|h| same_handler(h, handler)) {
            set.push(Arc::clone(handler));
        }
    }

    pub fn off(&self, kind: EventKind, handler: &Handler) {
        if let Some(set) = self.lock().get_mut(&kind) {
            set.retain(|h| !same_handler(h, handler));
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind and return how
    /// many ran to completion.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may subscribe/unsubscribe while we dispatch.
        let handlers: Vec<Handler> = match self.lock().get(&kind) {
            Some(set) => set.clone(),
            None => return 0,
        };
        let mut completed = 0;
        for h in handlers {
            match catch_unwind(AssertUnwindSafe(|| h(event))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(event = kind.as_str(), %reason, "event handler panicked");
                }
            }
        }
        completed
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.lock();
        f.debug_map()
            .entries(listeners.iter().map(|(k, v)| (k.as_str(), v.len())))
            .finish()
    }
}
