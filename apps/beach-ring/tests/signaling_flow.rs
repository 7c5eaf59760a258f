use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use beach_ring::handlers::AppState;
use beach_ring::server::build_router;
use beach_ring::signaling::{
    EndCallRequest, IceCandidateRequest, IncomingIceCandidate, IncomingOffer, OfferRequest,
};
use beach_ring::{ClientMessage, Relay, ServerMessage};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    relay: Relay,
    _shutdown: oneshot::Sender<()>,
}

async fn spawn_relay() -> TestRelay {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let relay = Relay::new();
    let router = build_router(AppState::new(relay.clone(), None), CorsLayer::permissive());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .ok();
    });

    TestRelay {
        addr,
        relay,
        _shutdown: shutdown_tx,
    }
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    ws
}

async fn send(ws: &mut Ws, message: &ClientMessage) {
    let text = serde_json::to_string(message).expect("encode client message");
    ws.send(Message::Text(text.into())).await.expect("send frame");
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay event")
            .expect("relay closed the socket")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("decode server message");
        }
    }
}

async fn expect_silence(ws: &mut Ws) {
    if let Ok(Some(Ok(frame))) = timeout(Duration::from_millis(200), ws.next()).await {
        panic!("expected no relay event, got {frame:?}");
    }
}

fn users(names: &[&str]) -> ServerMessage {
    ServerMessage::Users(names.iter().map(|name| name.to_string()).collect())
}

async fn register(ws: &mut Ws, identity: &str) {
    send(ws, &ClientMessage::Register(identity.to_string())).await;
}

#[test_timeout::tokio_timeout_test]
async fn register_offer_conflict_and_disconnect() {
    let server = spawn_relay().await;

    // Scenario A
    let mut alice = connect(server.addr).await;
    register(&mut alice, "alice").await;
    assert_eq!(recv(&mut alice).await, users(&["alice"]));

    let mut bob = connect(server.addr).await;
    register(&mut bob, "bob").await;
    assert_eq!(recv(&mut alice).await, users(&["alice", "bob"]));
    assert_eq!(recv(&mut bob).await, users(&["alice", "bob"]));

    let sdp = json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n" });
    send(
        &mut alice,
        &ClientMessage::Offer(OfferRequest {
            to: "bob".into(),
            offer: sdp.clone(),
        }),
    )
    .await;
    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::Offer(IncomingOffer {
            from: "alice".into(),
            offer: sdp,
        })
    );
    assert_eq!(server.relay.partner_of("alice").as_deref(), Some("bob"));
    assert_eq!(server.relay.partner_of("bob").as_deref(), Some("alice"));

    // Scenario B
    let mut carol = connect(server.addr).await;
    register(&mut carol, "carol").await;
    let everyone = users(&["alice", "bob", "carol"]);
    assert_eq!(recv(&mut carol).await, everyone);
    assert_eq!(recv(&mut alice).await, everyone);
    assert_eq!(recv(&mut bob).await, everyone);

    send(
        &mut carol,
        &ClientMessage::Offer(OfferRequest {
            to: "alice".into(),
            offer: json!({}),
        }),
    )
    .await;
    assert_eq!(
        recv(&mut carol).await,
        ServerMessage::CallError("One of the users is already in a call.".into())
    );
    expect_silence(&mut alice).await;
    assert_eq!(server.relay.partner_of("carol"), None);
    assert_eq!(server.relay.partner_of("alice").as_deref(), Some("bob"));

    // Scenario C
    alice.close(None).await.expect("close alice");
    assert_eq!(recv(&mut bob).await, ServerMessage::CallEnded);
    assert_eq!(recv(&mut bob).await, users(&["bob", "carol"]));
    assert_eq!(recv(&mut carol).await, users(&["bob", "carol"]));
    assert_eq!(server.relay.resolve("alice"), None);
    assert_eq!(server.relay.partner_of("alice"), None);
    assert_eq!(server.relay.partner_of("bob"), None);
}

#[test_timeout::tokio_timeout_test]
async fn duplicate_identity_gets_username_error() {
    let server = spawn_relay().await;

    let mut first = connect(server.addr).await;
    register(&mut first, "alice").await;
    assert_eq!(recv(&mut first).await, users(&["alice"]));

    let mut second = connect(server.addr).await;
    register(&mut second, "alice").await;
    assert_eq!(
        recv(&mut second).await,
        ServerMessage::UsernameError("Username already taken".into())
    );
    expect_silence(&mut first).await;

    register(&mut second, "alice2").await;
    assert_eq!(recv(&mut second).await, users(&["alice", "alice2"]));
    assert_eq!(recv(&mut first).await, users(&["alice", "alice2"]));
}

#[test_timeout::tokio_timeout_test]
async fn malformed_frames_do_not_break_the_connection() {
    let server = spawn_relay().await;

    let mut client = connect(server.addr).await;
    client
        .send(Message::Text("not json".into()))
        .await
        .expect("send garbage");
    client
        .send(Message::Text(r#"{"type":"offer","data":{"offer":1}}"#.into()))
        .await
        .expect("send offer without target");
    expect_silence(&mut client).await;

    register(&mut client, "alice").await;
    assert_eq!(recv(&mut client).await, users(&["alice"]));
}

#[test_timeout::tokio_timeout_test]
async fn candidates_and_hangup_are_routed() {
    let server = spawn_relay().await;

    let mut alice = connect(server.addr).await;
    register(&mut alice, "alice").await;
    recv(&mut alice).await;
    let mut bob = connect(server.addr).await;
    register(&mut bob, "bob").await;
    recv(&mut alice).await;
    recv(&mut bob).await;

    send(
        &mut alice,
        &ClientMessage::Offer(OfferRequest {
            to: "bob".into(),
            offer: json!({ "sdp": "o" }),
        }),
    )
    .await;
    recv(&mut bob).await;

    let candidate = json!({ "candidate": "candidate:0 1 UDP 2122252543 10.0.0.2 5000 typ host" });
    send(
        &mut bob,
        &ClientMessage::IceCandidate(IceCandidateRequest {
            to: "alice".into(),
            candidate: candidate.clone(),
        }),
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::IceCandidate(IncomingIceCandidate { candidate })
    );

    // Unknown targets are dropped without a reply.
    send(
        &mut bob,
        &ClientMessage::IceCandidate(IceCandidateRequest {
            to: "ghost".into(),
            candidate: json!({}),
        }),
    )
    .await;
    expect_silence(&mut bob).await;

    send(&mut bob, &ClientMessage::EndCall(EndCallRequest { to: "alice".into() })).await;
    assert_eq!(recv(&mut alice).await, ServerMessage::CallEnded);
    assert_eq!(server.relay.snapshot().active_calls, 0);

    // Both are free again, so a new call can be placed.
    send(
        &mut bob,
        &ClientMessage::Offer(OfferRequest {
            to: "alice".into(),
            offer: json!({ "sdp": "again" }),
        }),
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::Offer(IncomingOffer {
            from: "bob".into(),
            offer: json!({ "sdp": "again" }),
        })
    );
}
