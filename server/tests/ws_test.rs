//! Integration tests for the WebSocket handshake, app-level frames, heartbeats
//! and connection teardown.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use coded_server::config::WsConfig;
use coded_server::ws::{DeliveryGateway, HubHandle};

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

struct TestServer {
    addr: SocketAddr,
    jwt_secret: Vec<u8>,
    hub: HubHandle,
}

impl TestServer {
    fn token(&self, user_id: &str) -> String {
        coded_server::auth::jwt::issue_access_token(&self.jwt_secret, user_id)
            .expect("Failed to issue token")
    }

    fn ws_url(&self, user_id: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, self.token(user_id))
    }

    async fn wait_for_clients(&self, expected: usize) {
        for _ in 0..100 {
            if self.hub.connected_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} connected clients, found {}",
            expected,
            self.hub.connected_count()
        );
    }
}

/// Helper: start the server on a random port with the given socket settings.
async fn start_test_server(ws: WsConfig) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = coded_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = coded_server::auth::jwt::load_or_generate_jwt_secret(None, &data_dir)
        .expect("Failed to generate JWT secret");

    let hub = coded_server::ws::hub::spawn(ws.mailbox_capacity);
    let state = coded_server::state::AppState::new(db, jwt_secret.clone(), hub.clone(), ws);

    let app = coded_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        addr,
        jwt_secret,
        hub,
    }
}

/// Next text frame as JSON, skipping transport pings and pongs.
async fn next_json(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected a frame within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("Frame is not JSON")
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

/// Connect as `user_id` and consume the `connected` welcome.
async fn connect(
    server: &TestServer,
    user_id: &str,
) -> (
    futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    WsRead,
) {
    let (ws_stream, _) = tokio_tungstenite::connect_async(&server.ws_url(user_id))
        .await
        .expect("Failed to connect");
    let (write, mut read) = ws_stream.split();

    let welcome = next_json(&mut read).await;
    assert_eq!(welcome["type"], "connected");
    (write, read)
}

/// Wait for the server to end the connection: a close frame, an error or EOF.
async fn expect_closed(read: &mut WsRead) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), read.next())
            .await
            .expect("Expected the server to close the connection");
        match msg {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("Expected close, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_ws_connected_welcome() {
    let server = start_test_server(WsConfig::default()).await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(&server.ws_url("alice"))
        .await
        .expect("Failed to connect");
    let (_write, mut read) = ws_stream.split();

    let welcome = next_json(&mut read).await;
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["payload"]["userId"], "alice");
    assert!(welcome["payload"]["message"].is_string());
    assert!(welcome["payload"]["time"].as_i64().unwrap() > 0);

    server.wait_for_clients(1).await;
}

#[tokio::test]
async fn test_ws_app_ping_pong() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut write, mut read) = connect(&server, "alice").await;

    write
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .expect("Failed to send ping");

    let pong = next_json(&mut read).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["payload"]["time"].is_i64());
}

#[tokio::test]
async fn test_ws_subscribe_acks() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut write, mut read) = connect(&server, "alice").await;

    write
        .send(Message::Text(
            json!({"type": "subscribe", "channel": "chats"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut read).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["payload"]["channel"], "chats");
    assert_eq!(ack["payload"]["userId"], "alice");

    write
        .send(Message::Text(
            json!({"type": "subscribe_chat", "payload": {"chatId": "c1"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut read).await;
    assert_eq!(ack["type"], "chat_subscribed");
    assert_eq!(ack["payload"]["chatId"], "c1");
    assert_eq!(ack["payload"]["userId"], "alice");
}

#[tokio::test]
async fn test_ws_typing_reaches_other_clients() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut alice_write, _alice_read) = connect(&server, "alice").await;
    let (_bob_write, mut bob_read) = connect(&server, "bob").await;

    alice_write
        .send(Message::Text(
            json!({"type": "typing_start", "payload": {"chatId": "c1"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    alice_write
        .send(Message::Text(
            json!({"type": "typing_end", "payload": {"chatId": "c1"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let start = next_json(&mut bob_read).await;
    assert_eq!(start["type"], "typing_start");
    assert_eq!(start["payload"]["chatId"], "c1");
    assert_eq!(start["payload"]["userId"], "alice");

    let end = next_json(&mut bob_read).await;
    assert_eq!(end["type"], "typing_end");
    assert_eq!(end["payload"]["userId"], "alice");
}

#[tokio::test]
async fn test_ws_bad_frames_are_skipped() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut write, mut read) = connect(&server, "alice").await;

    for frame in [
        "not json".to_string(),
        json!({"type": "typing_start"}).to_string(),
        json!({"type": "dance"}).to_string(),
    ] {
        write.send(Message::Text(frame.into())).await.unwrap();
    }
    write
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();

    // Connection survives and the first reply is the pong.
    let pong = next_json(&mut read).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn test_ws_transport_ping_pong() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut write, mut read) = connect(&server, "alice").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => {
            panic!("Expected Pong message, got: {:?}", other);
        }
    }

    // One ping, one pong.
    let extra = tokio::time::timeout(Duration::from_millis(300), read.next()).await;
    assert!(extra.is_err(), "Expected a single pong, got: {:?}", extra);
}

#[tokio::test]
async fn test_ws_busy_receive_only_client_still_gets_heartbeats() {
    let server = start_test_server(WsConfig {
        heartbeat_interval_ms: 100,
        read_timeout_ms: 300,
        ..WsConfig::default()
    })
    .await;
    let (_write, mut read) = connect(&server, "alice").await;
    server.wait_for_clients(1).await;

    // Traffic every 50ms, more often than the heartbeat period.
    let hub = server.hub.clone();
    let chatter = tokio::spawn(async move {
        for _ in 0..20 {
            hub.typing_start("c1", "bob");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    // Keep reading so the client answers pings; it never sends anything itself.
    let mut pings = 0;
    let mut texts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while let Ok(msg) = tokio::time::timeout_at(deadline, read.next()).await {
        match msg {
            Some(Ok(Message::Ping(_))) => pings += 1,
            Some(Ok(Message::Text(_))) => texts += 1,
            Some(Ok(_)) => {}
            other => panic!("Connection ended while busy: {:?}", other),
        }
    }
    chatter.await.unwrap();

    assert!(pings > 0, "Expected heartbeats alongside traffic");
    assert!(texts >= 10, "Expected steady traffic, got {}", texts);
    assert_eq!(server.hub.connected_count(), 1);
}

#[tokio::test]
async fn test_ws_stalled_client_hits_write_deadline() {
    let server = start_test_server(WsConfig {
        // Large enough that the mailbox never overflows here.
        mailbox_capacity: 4096,
        write_timeout_ms: 200,
        ..WsConfig::default()
    })
    .await;

    // The client stops reading after the welcome, so the socket buffers fill.
    let (_write, _read) = connect(&server, "alice").await;
    server.wait_for_clients(1).await;

    let bulky = "x".repeat(512 * 1024);
    for _ in 0..64 {
        server.hub.typing_start(&bulky, "bob");
    }

    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_ws_heartbeat_pings_idle_client() {
    let server = start_test_server(WsConfig {
        heartbeat_interval_ms: 100,
        ..WsConfig::default()
    })
    .await;
    let (_write, mut read) = connect(&server, "alice").await;

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected heartbeat within timeout");
    assert!(
        matches!(msg, Some(Ok(Message::Ping(_)))),
        "Expected heartbeat ping, got: {:?}",
        msg
    );
}

#[tokio::test]
async fn test_ws_silent_client_is_dropped() {
    let server = start_test_server(WsConfig {
        read_timeout_ms: 200,
        ..WsConfig::default()
    })
    .await;
    let (_write, mut read) = connect(&server, "alice").await;
    server.wait_for_clients(1).await;

    expect_closed(&mut read).await;
    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_ws_oversize_frame_closes_connection() {
    let server = start_test_server(WsConfig::default()).await;
    let (mut write, mut read) = connect(&server, "alice").await;
    server.wait_for_clients(1).await;

    let content = "x".repeat(2048);
    let _ = write
        .send(Message::Text(
            json!({"type": "typing_start", "payload": {"chatId": content}})
                .to_string()
                .into(),
        ))
        .await;

    expect_closed(&mut read).await;
    server.wait_for_clients(0).await;
}

#[tokio::test]
async fn test_ws_invalid_token_closes_4002() {
    let server = start_test_server(WsConfig::default()).await;

    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", server.addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");
    let (_write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4002));
        }
        other => panic!("Expected close frame 4002, got: {:?}", other),
    }
    assert_eq!(server.hub.connected_count(), 0);
}

#[tokio::test]
async fn test_ws_expired_token_closes_4001() {
    let server = start_test_server(WsConfig::default()).await;

    let now = chrono::Utc::now().timestamp();
    let claims = coded_server::auth::middleware::Claims {
        user_id: "alice".to_string(),
        iat: now - 7200,
        exp: now - 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(&server.jwt_secret),
    )
    .unwrap();

    let ws_url = format!("ws://{}/ws?token={}", server.addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    let (_write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::from(4001));
        }
        other => panic!("Expected close frame 4001, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_missing_token_is_rejected() {
    let server = start_test_server(WsConfig::default()).await;

    let ws_url = format!("ws://{}/ws", server.addr);
    match tokio_tungstenite::connect_async(&ws_url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("Expected HTTP 401, got: {:?}", other),
        Ok(_) => panic!("Upgrade without a token must be refused"),
    }
}

#[tokio::test]
async fn test_ws_connection_cleanup_on_disconnect() {
    let server = start_test_server(WsConfig::default()).await;

    {
        let (mut write, _read) = connect(&server, "alice").await;
        server.wait_for_clients(1).await;
        write
            .send(Message::Close(None))
            .await
            .expect("Failed to send close");
    }

    server.wait_for_clients(0).await;

    // Reconnect should work fine (connection was cleaned up)
    let (_write, _read) = connect(&server, "alice").await;
    server.wait_for_clients(1).await;

    let stats: Value = reqwest::get(format!("http://{}/api/ws/stats", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connectedClients"], 1);
}
