//! End-to-end tests for tenant-scoped realtime delivery.
//!
//! Each test boots the full router on a random port, connects real
//! WebSocket clients, and publishes through the HTTP endpoint the way a
//! business route would.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use comanda_server::config::Config;
use comanda_server::pipeline::create_router;
use comanda_server::routes::AppState;
use comanda_server::types::TenantId;

const TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client waits before concluding nothing was sent to it.
const QUIET_PERIOD: Duration = Duration::from_millis(250);

const TOKEN_42: &str = "restaurante-42-token";
const TOKEN_7: &str = "restaurante-7-token";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config() -> Config {
    let mut api_tokens = HashMap::new();
    api_tokens.insert(TOKEN_42.to_string(), TenantId::parse("42").unwrap());
    api_tokens.insert(TOKEN_7.to_string(), TenantId::parse("7").unwrap());
    Config {
        port: 0,
        allowed_origins: vec!["http://localhost:5173".to_string()],
        api_tokens,
        unsafe_trust_tenant_header: false,
        uploads_dir: PathBuf::from("does-not-exist"),
        database: None,
    }
}

/// Spawns the server on a random port and returns its address and state.
async fn spawn_test_server() -> (SocketAddr, AppState) {
    let state = AppState::new(test_config());
    let app = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Reads frames until the next JSON text frame.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Asserts that no text frame arrives within the quiet period.
async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET_PERIOD, ws.next()).await {
        panic!("unexpected frame: {text}");
    }
}

/// Connects a client and consumes the `connected` greeting.
async fn connect(addr: SocketAddr) -> WsStream {
    let (mut ws, _) = connect_async(format!("ws://{addr}/socket")).await.unwrap();
    let greeting = next_frame(&mut ws).await;
    assert_eq!(greeting["event"], "connected");
    assert!(greeting["data"]["connection_id"].is_string());
    ws
}

async fn send_json(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Joins `tenant` and waits for the acknowledgement.
async fn join(ws: &mut WsStream, tenant: Value) {
    send_json(ws, json!({"event": "join_company_room", "data": tenant})).await;
    let ack = next_frame(ws).await;
    assert_eq!(ack["event"], "joined_company_room");
}

/// Publishes through the HTTP endpoint as the holder of `token`.
async fn publish(addr: SocketAddr, token: &str, event: &str, data: Value) -> Value {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/realtime/events"))
        .bearer_auth(token)
        .json(&json!({"event": event, "data": data}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    response.json().await.unwrap()
}

/// Waits until the server has dropped every connection.
async fn wait_for_no_connections(state: &AppState) {
    timeout(TIMEOUT, async {
        while state.hub.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections were not cleaned up");
}

// ============================================================================
// Tenant isolation
// ============================================================================

#[tokio::test]
async fn event_reaches_only_its_tenant() {
    let (addr, _state) = spawn_test_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, json!(42)).await;
    join(&mut b, json!(7)).await;

    let report = publish(addr, TOKEN_42, "order_created", json!({"id": 1})).await;
    assert_eq!(report["recipients"], 1);
    assert_eq!(report["empresa_id"], "42");

    let event = next_frame(&mut a).await;
    assert_eq!(event["event"], "order_created");
    assert_eq!(event["data"], json!({"id": 1}));
    assert!(event["emitted_at"].is_string());

    assert_silent(&mut b).await;
}

#[tokio::test]
async fn string_and_integer_ids_name_the_same_channel() {
    let (addr, _state) = spawn_test_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, json!(42)).await;
    join(&mut b, json!("42")).await;

    let report = publish(addr, TOKEN_42, "menu_updated", json!(null)).await;
    assert_eq!(report["recipients"], 2);

    assert_eq!(next_frame(&mut a).await["event"], "menu_updated");
    assert_eq!(next_frame(&mut b).await["event"], "menu_updated");
}

#[tokio::test]
async fn rejoin_moves_connection_to_new_tenant() {
    let (addr, _state) = spawn_test_server().await;
    let mut ws = connect(addr).await;
    join(&mut ws, json!(42)).await;
    join(&mut ws, json!(7)).await;

    let old = publish(addr, TOKEN_42, "order_created", json!({"id": 1})).await;
    assert_eq!(old["recipients"], 0);

    let new = publish(addr, TOKEN_7, "order_created", json!({"id": 2})).await;
    assert_eq!(new["recipients"], 1);
    assert_eq!(next_frame(&mut ws).await["data"], json!({"id": 2}));
}

#[tokio::test]
async fn repeated_join_is_acknowledged_without_duplicating_membership() {
    let (addr, state) = spawn_test_server().await;
    let mut ws = connect(addr).await;
    join(&mut ws, json!(42)).await;
    join(&mut ws, json!(42)).await;

    assert_eq!(state.hub.channel_count(), 1);
    let report = publish(addr, TOKEN_42, "order_created", json!({})).await;
    assert_eq!(report["recipients"], 1);
    assert_eq!(next_frame(&mut ws).await["event"], "order_created");
    assert_silent(&mut ws).await;
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn sequential_publishes_arrive_in_order() {
    let (addr, _state) = spawn_test_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, json!(42)).await;
    join(&mut b, json!(42)).await;

    for seq in 0..10 {
        publish(addr, TOKEN_42, "order_updated", json!({"seq": seq})).await;
    }

    for ws in [&mut a, &mut b] {
        for seq in 0..10 {
            assert_eq!(next_frame(ws).await["data"]["seq"], seq);
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn publish_after_disconnect_reaches_nobody() {
    let (addr, state) = spawn_test_server().await;
    let mut ws = connect(addr).await;
    join(&mut ws, json!(42)).await;

    ws.close(None).await.unwrap();
    wait_for_no_connections(&state).await;

    let report = publish(addr, TOKEN_42, "order_created", json!({"id": 1})).await;
    assert_eq!(report["recipients"], 0);
    assert_eq!(report["failed"], 0);
    assert_eq!(state.hub.channel_count(), 0);
}

#[tokio::test]
async fn dropped_client_does_not_affect_others() {
    let (addr, state) = spawn_test_server().await;
    let mut survivor = connect(addr).await;
    let mut dropped = connect(addr).await;
    join(&mut survivor, json!(42)).await;
    join(&mut dropped, json!(42)).await;

    drop(dropped);
    timeout(TIMEOUT, async {
        while state.hub.connection_count() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dropped connection was not cleaned up");

    let report = publish(addr, TOKEN_42, "order_ready", json!({"mesa": 3})).await;
    assert_eq!(report["recipients"], 1);
    assert_eq!(next_frame(&mut survivor).await["event"], "order_ready");
}

#[tokio::test]
async fn malformed_signals_keep_connection_open() {
    let (addr, _state) = spawn_test_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::text("not json".to_string())).await.unwrap();
    ws.send(Message::binary(vec![1, 2, 3])).await.unwrap();
    send_json(&mut ws, json!({"event": "join_company_room", "data": null})).await;
    send_json(&mut ws, json!({"event": "join_company_room", "data": [42]})).await;
    send_json(&mut ws, json!({"event": "subscribe_everything"})).await;

    // None of the above produced an acknowledgement.
    assert_silent(&mut ws).await;

    join(&mut ws, json!(42)).await;
    publish(addr, TOKEN_42, "order_created", json!({})).await;
    assert_eq!(next_frame(&mut ws).await["event"], "order_created");
}

#[tokio::test]
async fn unbound_connection_receives_no_events() {
    let (addr, _state) = spawn_test_server().await;
    let mut ws = connect(addr).await;

    let report = publish(addr, TOKEN_42, "order_created", json!({})).await;
    assert_eq!(report["recipients"], 0);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn close_all_sends_close_frame() {
    let (addr, state) = spawn_test_server().await;
    let mut ws = connect(addr).await;
    join(&mut ws, json!(42)).await;

    assert_eq!(state.connections.close_all(), 1);

    let closed = timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .expect("close frame not received");
    assert!(closed);

    wait_for_no_connections(&state).await;
}

#[tokio::test]
async fn untrusted_origin_cannot_open_socket() {
    let (addr, state) = spawn_test_server().await;
    let mut request = format!("ws://{addr}/socket").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("https://evil.example"));

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade from untrusted origin succeeded"),
    }
    assert_eq!(state.hub.connection_count(), 0);
}

#[tokio::test]
async fn trusted_origin_can_open_socket() {
    let (addr, state) = spawn_test_server().await;
    let mut request = format!("ws://{addr}/socket").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_static("http://localhost:5173"));

    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(next_frame(&mut ws).await["event"], "connected");
    assert_eq!(state.hub.connection_count(), 1);
}
