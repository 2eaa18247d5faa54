//! Shared helpers for integration tests: an in-process server and an event
//! recorder for the bus.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use racktop::bus::{handler, Event, EventBus, EventKind, Handler};

pub const ALL_KINDS: [EventKind; 9] = [
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::Error,
    EventKind::Reconnecting,
    EventKind::MetricsUpdate,
    EventKind::ConnectionEstablished,
    EventKind::Heartbeat,
    EventKind::ServerError,
    EventKind::Message,
];

/// Serve `app` on an ephemeral localhost port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// Records every event published on a bus, in order.
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    _handler: Handler,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events: Arc<Mutex<Vec<Event>>> = Arc::default();
        let h = {
            let events = Arc::clone(&events);
            handler(move |e| events.lock().unwrap().push(e.clone()))
        };
        for kind in ALL_KINDS {
            bus.on(kind, &h);
        }
        Self {
            events,
            _handler: h,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn of(&self, kind: EventKind) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.kind() == kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of(kind).len()
    }
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    tokio::time::timeout(limit, fut).await.expect("timed out")
}
