//! Glue between the live channel, the REST fallback and whatever draws the
//! dashboard.
//!
//! A [`Session`] subscribes to the client's bus, feeds every accepted update
//! through one [`Reconciler`] and keeps the user-visible status (error
//! banner, last refresh, pending reconnect). Readers only ever see state after
//! an update has been fully applied.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, FetchError};
use crate::bus::{handler, Event, EventKind, Handler};
use crate::history::TimeSeriesBuffer;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::types::{ConnectionState, OverviewSnapshot, ServerIdentity};
use crate::ws::{MetricsClient, NORMAL_CLOSURE};

pub const CONNECTION_LOST: &str = "Connection lost";
const GENERIC_ERROR: &str = "Connection error";

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Where a manual refresh was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    /// The live channel was asked for an immediate push.
    Live,
    /// A REST fetch replaced the snapshot.
    Fallback,
}

#[derive(Debug, Default)]
pub struct SessionState {
    reconciler: Reconciler,
    fetch_error: Option<String>,
    live_error: Option<String>,
    loading: bool,
    last_refresh: Option<DateTime<Local>>,
    reconnecting: Option<(u32, Duration)>,
    last_message: Option<Value>,
    api_health: Option<String>,
}

impl SessionState {
    pub fn overview(&self) -> &OverviewSnapshot {
        self.reconciler.overview()
    }

    pub fn chart(&self) -> &TimeSeriesBuffer {
        self.reconciler.chart()
    }

    /// True once any snapshot, full or partial, has been applied.
    pub fn has_data(&self) -> bool {
        self.reconciler.last_update().is_some()
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn last_refresh(&self) -> Option<DateTime<Local>> {
        self.last_refresh
    }

    pub fn reconnecting(&self) -> Option<(u32, Duration)> {
        self.reconnecting
    }

    pub fn last_message(&self) -> Option<&Value> {
        self.last_message.as_ref()
    }

    /// Backend status from the last health check, `unreachable` on failure.
    pub fn api_health(&self) -> Option<&str> {
        self.api_health.as_deref()
    }

    pub fn fetch_error(&self) -> Option<&str> {
        self.fetch_error.as_deref()
    }

    pub fn live_error(&self) -> Option<&str> {
        self.live_error.as_deref()
    }

    /// Message for the error banner; a failed fetch wins over live-channel
    /// trouble.
    pub fn banner(&self) -> Option<&str> {
        match (&self.fetch_error, &self.live_error) {
            (Some(e), _) => Some(e.as_str()),
            (None, Some(e)) if !e.is_empty() => Some(e.as_str()),
            (None, Some(_)) => Some(GENERIC_ERROR),
            (None, None) => None,
        }
    }

    fn applied(&mut self) {
        self.last_refresh = self.reconciler.last_update();
    }
}

type SharedState = Arc<Mutex<SessionState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    state: SharedState,
    client: MetricsClient,
    api: ApiClient,
    subscriptions: Vec<(EventKind, Handler)>,
}

impl Session {
    /// Subscribe to `client`'s bus. The connection is left as it is; call
    /// [`MetricsClient::connect`] to go live.
    pub fn new(client: MetricsClient, api: ApiClient) -> Self {
        let state: SharedState = Arc::default();
        let subscriptions = subscribe(&state);
        for (kind, h) in &subscriptions {
            client.bus().on(*kind, h);
        }
        Self {
            state,
            client,
            api,
            subscriptions,
        }
    }

    pub fn client(&self) -> &MetricsClient {
        &self.client
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Connectivity comes straight from the transport, never cached here.
    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&lock(&self.state))
    }

    /// Startup fetch, before the live channel has delivered anything.
    pub async fn load_initial(&self) -> Result<(), FetchError> {
        self.fetch_overview().await
    }

    /// Replace the snapshot from the REST endpoint. Failures land in the
    /// banner and leave the live channel alone.
    pub async fn fetch_overview(&self) -> Result<(), FetchError> {
        {
            let mut st = lock(&self.state);
            st.loading = true;
            st.fetch_error = None;
        }
        let result = self.api.fetch_overview().await;
        let mut st = lock(&self.state);
        st.loading = false;
        match result {
            Ok(snapshot) => {
                st.reconciler.replace(snapshot);
                st.applied();
                debug!("overview replaced from fallback");
                Ok(())
            }
            Err(e) => {
                st.fetch_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Manual refresh: ask the live channel for a push when it is up,
    /// otherwise fetch over REST.
    pub async fn refresh(&self) -> Result<RefreshSource, FetchError> {
        if self.client.is_connected() && self.client.request_update() {
            info!("requested live update");
            return Ok(RefreshSource::Live);
        }
        self.fetch_overview().await?;
        Ok(RefreshSource::Fallback)
    }

    /// Fetch one server over REST and merge it like a live partial update.
    pub async fn refresh_server(&self, id: ServerIdentity) -> Result<(), RefreshError> {
        let result = self.api.fetch_server(id).await;
        let mut st = lock(&self.state);
        let applied = match result {
            Ok(doc) => st.reconciler.merge_server(id, &doc).map_err(RefreshError::from),
            Err(e) => Err(e.into()),
        };
        match &applied {
            Ok(()) => {
                st.fetch_error = None;
                st.applied();
            }
            Err(e) => st.fetch_error = Some(e.to_string()),
        }
        applied
    }

    /// Read `/api/health` into the header status. Does not touch the banner.
    pub async fn check_health(&self) -> Result<(), FetchError> {
        let result = self.api.health().await;
        let status = match &result {
            Ok(body) => body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("ok")
                .to_string(),
            Err(_) => "unreachable".to_string(),
        };
        debug!(%status, "health checked");
        lock(&self.state).api_health = Some(status);
        result.map(drop)
    }

    /// Unsubscribe from the bus. Safe to call more than once.
    pub fn detach(&mut self) {
        for (kind, h) in self.subscriptions.drain(..) {
            self.client.bus().off(kind, &h);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .field("api", &self.api.base_url().as_str())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

fn subscribe(state: &SharedState) -> Vec<(EventKind, Handler)> {
    let on_update = {
        let state = Arc::clone(state);
        handler(move |event| {
            let Event::MetricsUpdate(update) = event else { return };
            let mut st = lock(&state);
            match st.reconciler.apply(update) {
                Ok(()) => st.applied(),
                Err(e) => warn!(error = %e, "metrics update rejected"),
            }
        })
    };
    let on_connected = {
        let state = Arc::clone(state);
        handler(move |_| {
            let mut st = lock(&state);
            st.live_error = None;
            st.reconnecting = None;
        })
    };
    let on_disconnected = {
        let state = Arc::clone(state);
        handler(move |event| {
            if let Event::Disconnected { code, .. } = event {
                if *code != NORMAL_CLOSURE {
                    lock(&state).live_error = Some(CONNECTION_LOST.into());
                }
            }
        })
    };
    let on_error = {
        let state = Arc::clone(state);
        handler(move |event| {
            let message = match event {
                Event::Error { message, .. } | Event::ServerError { message, .. } => message,
                _ => return,
            };
            lock(&state).live_error = Some(message.clone());
        })
    };
    let on_reconnecting = {
        let state = Arc::clone(state);
        handler(move |event| {
            if let Event::Reconnecting { attempt, delay } = event {
                lock(&state).reconnecting = Some((*attempt, *delay));
            }
        })
    };
    let on_message = {
        let state = Arc::clone(state);
        handler(move |event| {
            if let Event::Message(payload) = event {
                let mut st = lock(&state);
                st.last_message = Some(payload.clone());
                st.live_error = None;
            }
        })
    };

    vec![
        (EventKind::MetricsUpdate, on_update),
        (EventKind::Connected, on_connected),
        (EventKind::Disconnected, on_disconnected),
        (EventKind::Error, Arc::clone(&on_error)),
        (EventKind::ServerError, on_error),
        (EventKind::Reconnecting, on_reconnecting),
        (EventKind::Message, on_message),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::protocol::{MetricsUpdate, UpdateScope};
    use crate::ws::ClientOptions;
    use chrono::Utc;
    use serde_json::json;
    use url::Url;

    fn session() -> Session {
        let client = MetricsClient::new(
            ClientOptions::new(Url::parse("ws://127.0.0.1:9/ws/metrics").unwrap()),
            EventBus::new(),
        );
        let api = ApiClient::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        Session::new(client, api)
    }

    #[test]
    fn live_updates_reach_the_snapshot() {
        let s = session();
        s.client().bus().emit(&Event::MetricsUpdate(MetricsUpdate {
            scope: UpdateScope::Server(ServerIdentity::Ai),
            data: json!({"cpu": {"usage_percent": 55.0}}),
            timestamp: None,
        }));
        s.with_state(|st| {
            assert!(st.has_data());
            assert!(st.last_refresh().is_some());
            assert_eq!(st.overview().usage(ServerIdentity::Ai, "cpu"), 55.0);
            assert_eq!(st.chart().len(), 1);
        });
    }

    #[test]
    fn abnormal_close_sets_banner_and_connect_clears_it() {
        let s = session();
        let bus = s.client().bus().clone();
        bus.emit(&Event::Disconnected {
            code: 1000,
            reason: String::new(),
            timestamp: Utc::now(),
        });
        assert_eq!(s.with_state(|st| st.banner().map(str::to_owned)), None);

        bus.emit(&Event::Disconnected {
            code: 1006,
            reason: String::new(),
            timestamp: Utc::now(),
        });
        bus.emit(&Event::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(5),
        });
        s.with_state(|st| {
            assert_eq!(st.banner(), Some(CONNECTION_LOST));
            assert_eq!(st.reconnecting(), Some((1, Duration::from_secs(5))));
        });

        bus.emit(&Event::Connected {
            timestamp: Utc::now(),
        });
        s.with_state(|st| {
            assert_eq!(st.banner(), None);
            assert_eq!(st.reconnecting(), None);
        });
    }

    #[test]
    fn server_error_frames_show_in_the_banner() {
        let s = session();
        s.client().bus().emit(&Event::ServerError {
            message: "collector offline".into(),
            payload: json!({}),
        });
        assert_eq!(
            s.with_state(|st| st.banner().map(str::to_owned)).as_deref(),
            Some("collector offline")
        );
    }

    #[test]
    fn detach_unsubscribes_everything() {
        let mut s = session();
        let bus = s.client().bus().clone();
        assert_eq!(bus.listener_count(EventKind::Error), 1);
        s.detach();
        s.detach();
        for kind in [
            EventKind::MetricsUpdate,
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Error,
            EventKind::ServerError,
            EventKind::Reconnecting,
            EventKind::Message,
        ] {
            assert_eq!(bus.listener_count(kind), 0, "{}", kind.as_str());
        }
    }

    #[tokio::test]
    async fn refresh_falls_back_when_offline_and_reports_failure() {
        let s = session();
        let err = s.refresh().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        s.with_state(|st| {
            assert!(!st.loading());
            assert!(st.fetch_error().is_some());
            assert!(st.banner().is_some());
            assert!(!st.has_data());
        });
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
    }
}
