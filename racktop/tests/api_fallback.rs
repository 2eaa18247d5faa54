//! REST fallback against an in-process HTTP server.

mod common;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use url::Url;

use common::{closed_port, serve};
use racktop::api::{ApiClient, FetchError};
use racktop::bus::EventBus;
use racktop::session::{RefreshError, RefreshSource, Session};
use racktop::types::ServerIdentity;
use racktop::ws::{metrics_endpoint, ClientOptions, MetricsClient};

fn overview() -> Value {
    json!({
        "total_servers": 3,
        "online_servers": 2,
        "alerts_count": 4,
        "last_updated": "2024-05-01T10:00:00",
        "ai_server": {
            "cpu": {"usage_percent": 35.0, "cores": 64},
            "memory": {"usage_percent": 60.0, "used_gb": 300.0, "total_gb": 512.0},
            "gpu": {"usage_percent": 88.0, "name": "H100"},
            "server_status": {"status": "online", "response_time_ms": 12.5}
        },
        "app_server": {
            "cpu": {"usage_percent": 15.0},
            "vms": [{"vmid": 101, "name": "web", "status": "running"}],
            "server_status": {"status": "online"}
        },
        "storage_server": {
            "cpu": {"usage_percent": 5.0},
            "filesystems": [{"mount_point": "/data", "file_count": 1200}],
            "server_status": {"status": "offline"}
        }
    })
}

async fn healthy() -> Url {
    let app = Router::new()
        .route("/api/servers/overview", get(|| async { Json(overview()) }))
        .route(
            "/api/storage-server/",
            get(|| async {
                Json(json!({
                    "cpu": {"usage_percent": 77.0},
                    "server_status": {"status": "online"}
                }))
            }),
        )
        .route("/api/health", get(|| async { Json(json!({"status": "healthy"})) }));
    Url::parse(&format!("http://{}", serve(app).await)).unwrap()
}

async fn failing() -> Url {
    let app = Router::new()
        .route(
            "/api/servers/overview",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/api/ai-server/", get(|| async { "definitely not json" }));
    Url::parse(&format!("http://{}", serve(app).await)).unwrap()
}

async fn array_body() -> Url {
    let app = Router::new().route("/api/servers/overview", get(|| async { Json(json!([])) }));
    Url::parse(&format!("http://{}", serve(app).await)).unwrap()
}

// The live channel points at a closed port so every refresh takes the REST path.
fn offline_session(base: Url) -> Session {
    let ws = Url::parse(&format!("ws://127.0.0.1:{}/ws/metrics", closed_port())).unwrap();
    let client = MetricsClient::new(ClientOptions::new(ws), EventBus::new());
    Session::new(client, ApiClient::new(base).unwrap())
}

#[tokio::test]
async fn overview_decodes_into_snapshot() {
    let api = ApiClient::new(healthy().await).unwrap();
    let snap = api.fetch_overview().await.unwrap();
    assert_eq!(snap.total_servers, 3);
    assert_eq!(snap.online_servers, 2);
    assert_eq!(snap.alerts_count, 4);
    assert_eq!(snap.last_updated.as_deref(), Some("2024-05-01T10:00:00"));
    let ai = snap.server(ServerIdentity::Ai).unwrap();
    assert_eq!(ai.gpu().unwrap().name, "H100");
    assert_eq!(ai.health().unwrap().response_time_ms, Some(12.5));
    assert_eq!(snap.server(ServerIdentity::App).unwrap().vms().len(), 1);

    assert_eq!(api.health().await.unwrap()["status"], "healthy");
}

#[tokio::test]
async fn initial_load_feeds_snapshot_and_chart() {
    let session = offline_session(healthy().await);
    session.load_initial().await.unwrap();
    session.with_state(|st| {
        assert!(!st.loading());
        assert_eq!(st.banner(), None);
        assert_eq!(st.chart().len(), 1);
        let point = st.chart().last().unwrap();
        assert_eq!(point.get("ai_cpu"), 35.0);
        assert_eq!(point.get("ai_memory"), 60.0);
        assert_eq!(point.get("ai_gpu"), 88.0);
        assert_eq!(point.get("app_cpu"), 15.0);
        assert_eq!(point.get("storage_cpu"), 5.0);
    });

    assert_eq!(session.refresh().await.unwrap(), RefreshSource::Fallback);
    assert_eq!(session.with_state(|st| st.chart().len()), 2);
}

#[tokio::test]
async fn single_server_fetch_merges_like_a_partial_update() {
    let session = offline_session(healthy().await);
    session.load_initial().await.unwrap();
    session.refresh_server(ServerIdentity::Storage).await.unwrap();
    session.with_state(|st| {
        let o = st.overview();
        assert_eq!(o.usage(ServerIdentity::Storage, "cpu"), 77.0);
        // untouched sections and servers survive
        assert_eq!(o.server(ServerIdentity::Storage).unwrap().filesystems().len(), 1);
        assert_eq!(o.usage(ServerIdentity::Ai, "cpu"), 35.0);
        assert_eq!(o.online_servers, 3);
        assert_eq!(st.chart().len(), 2);
    });
}

#[tokio::test]
async fn non_success_status_is_a_request_error() {
    let base = failing().await;
    let api = ApiClient::new(base.clone()).unwrap();
    let err = api.fetch_overview().await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert!(matches!(err, FetchError::Request { .. }));

    let session = offline_session(base);
    assert!(session.load_initial().await.is_err());
    session.with_state(|st| {
        let banner = st.banner().unwrap();
        assert!(banner.contains("500"), "{banner}");
        assert!(!st.has_data());
    });
}

#[tokio::test]
async fn unparseable_body_is_a_decode_error() {
    let base = failing().await;
    let session = offline_session(base);
    let err = session.refresh_server(ServerIdentity::Ai).await.unwrap_err();
    assert!(matches!(err, RefreshError::Fetch(FetchError::Decode { .. })), "{err:?}");
    assert!(session.with_state(|st| st.fetch_error().is_some()));
}

#[tokio::test]
async fn array_overview_is_rejected_without_touching_state() {
    let base = array_body().await;
    let err = ApiClient::new(base.clone()).unwrap().fetch_overview().await.unwrap_err();
    match &err {
        FetchError::Decode { url, .. } => {
            assert!(url.starts_with(base.as_str().trim_end_matches('/')), "{url}");
            assert!(url.ends_with("/api/servers/overview"), "{url}");
        }
        other => panic!("unexpected {other:?}"),
    }

    let session = offline_session(base);
    assert!(session.load_initial().await.is_err());
    session.with_state(|st| {
        assert!(!st.has_data());
        assert!(st.overview().servers.is_empty());
        assert_eq!(st.chart().len(), 0);
    });
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let base = Url::parse(&format!("http://127.0.0.1:{}", closed_port())).unwrap();
    let err = ApiClient::new(base).unwrap().fetch_overview().await.unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
    assert_eq!(err.status(), None);
}

#[test]
fn live_endpoint_follows_api_origin() {
    let base = Url::parse("http://127.0.0.1:8000/").unwrap();
    assert_eq!(
        metrics_endpoint(&base).unwrap().as_str(),
        "ws://127.0.0.1:8000/ws/metrics"
    );
}


#[tokio::test]
async fn health_check_reports_backend_status() {
    let session = offline_session(healthy().await);
    session.check_health().await.unwrap();
    session.with_state(|st| {
        assert_eq!(st.api_health(), Some("healthy"));
        assert!(st.banner().is_none());
    });

    let down = offline_session(Url::parse(&format!("http://127.0.0.1:{}", closed_port())).unwrap());
    assert!(down.check_health().await.is_err());
    down.with_state(|st| assert_eq!(st.api_health(), Some("unreachable")));
}
