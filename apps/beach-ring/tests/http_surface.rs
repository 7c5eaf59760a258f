use std::sync::OnceLock;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

use beach_ring::handlers::AppState;
use beach_ring::registry::ConnectionId;
use beach_ring::server::build_router;
use beach_ring::signaling::OfferRequest;
use beach_ring::{ClientMessage, Relay, ServerMessage};

/// The metrics recorder is process-global, so every test shares one.
fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install prometheus recorder")
        })
        .clone()
}

fn router(relay: &Relay, metrics: Option<PrometheusHandle>) -> Router {
    build_router(AppState::new(relay.clone(), metrics), CorsLayer::permissive())
}

async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("router response");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    (
        status,
        content_type,
        String::from_utf8(body.to_vec()).expect("utf-8 body"),
    )
}

fn register(relay: &Relay, identity: &str) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
    let (connection, rx) = relay.attach();
    relay
        .handle(connection, ClientMessage::Register(identity.into()))
        .expect("register");
    (connection, rx)
}

#[test_timeout::tokio_timeout_test]
async fn health_reports_ok() {
    let relay = Relay::new();
    let (status, _, body) = get(router(&relay, None), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "status": "ok" }));
}

#[test_timeout::tokio_timeout_test]
async fn stats_reflect_registrations_and_calls() {
    let relay = Relay::new();
    let (alice, _alice_rx) = register(&relay, "alice");
    let (_bob, _bob_rx) = register(&relay, "bob");
    relay
        .handle(
            alice,
            ClientMessage::Offer(OfferRequest {
                to: "bob".into(),
                offer: json!({ "sdp": "v=0" }),
            }),
        )
        .expect("offer");

    let (status, _, body) = get(router(&relay, None), "/debug/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!({
            "connections": 2,
            "identities": ["alice", "bob"],
            "active_calls": 1,
        })
    );
}

#[test_timeout::tokio_timeout_test]
async fn metrics_without_recorder_is_not_found() {
    let relay = Relay::new();
    let (status, _, _) = get(router(&relay, None), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test_timeout::tokio_timeout_test]
async fn metrics_expose_relay_series() {
    let handle = metrics_handle();
    let relay = Relay::new();
    let (alice, _alice_rx) = register(&relay, "alice");
    let (_bob, _bob_rx) = register(&relay, "bob");
    relay
        .handle(
            alice,
            ClientMessage::Offer(OfferRequest {
                to: "bob".into(),
                offer: json!({}),
            }),
        )
        .expect("offer");

    let (status, content_type, body) = get(router(&relay, Some(handle)), "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
    for series in [
        "beach_ring_connections_total",
        "beach_ring_registrations_total",
        "beach_ring_offers_total",
        "beach_ring_messages_relayed_total",
        "beach_ring_identities",
        "beach_ring_active_calls",
    ] {
        assert!(body.contains(series), "missing {series} in:\n{body}");
    }
    assert!(body.contains(r#"outcome="ok""#), "missing registration outcome in:\n{body}");
}
