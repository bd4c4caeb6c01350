//! End-to-end tests for the operator gateway: HTTP surface plus the bus
//! websocket protocol over a real socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use var_web::{Bus, ServerSettings, UiSettings};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    bus: Arc<Bus>,
    poked: Arc<AtomicUsize>,
}

async fn spawn_server() -> TestServer {
    let bus = Arc::new(Bus::new(UiSettings::default()));
    bus.add_event_type("demo_topic", || json!({"value": 1}));

    #[derive(Deserialize)]
    struct PokeCommand {
        amount: usize,
    }
    let poked = Arc::new(AtomicUsize::new(0));
    let sink = poked.clone();
    bus.add_command_handler("poke", move |cmd: PokeCommand| {
        let sink = sink.clone();
        async move {
            sink.fetch_add(cmd.amount, Ordering::SeqCst);
        }
        .boxed()
    });

    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = var_web::router(bus.clone(), settings);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, bus, poked }
}

async fn connect_ws(addr: SocketAddr) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/websocket"))
        .await
        .unwrap();
    ws
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn subscribe_and_receive_events() {
    let server = spawn_server().await;
    let mut ws = connect_ws(server.addr).await;

    ws.send(Message::text(
        r#"{"type": "subscribe", "event_types": ["demo_topic", "ui_settings", "bogus"], "request_id": 1}"#,
    ))
    .await
    .unwrap();

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "subscribe");
    assert_eq!(reply["request_id"], 1);
    assert_eq!(reply["initial_data"]["demo_topic"]["value"], 1);
    assert_eq!(reply["initial_data"]["ui_settings"]["swap_red_blue"], false);
    assert!(reply["initial_data"].get("bogus").is_none());

    server.bus.notify("demo_topic", Some(json!({"value": 2})));
    let event = recv_json(&mut ws).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["event_type"], "demo_topic");
    assert_eq!(event["data"]["value"], 2);

    ws.send(Message::text(
        r#"{"type": "unsubscribe", "event_types": ["demo_topic"], "request_id": 2}"#,
    ))
    .await
    .unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "unsubscribe");
    assert_eq!(reply["unsubscribed_event_types"], json!(["demo_topic"]));

    // No longer subscribed: the next frame is the reload broadcast below,
    // not a demo_topic event.
    server.bus.notify("demo_topic", None);
    server.bus.reload_clients();
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame, json!({"type": "reload"}));
}

#[tokio::test]
async fn commands_round_trip_and_bad_payloads_are_dropped() {
    let server = spawn_server().await;
    let mut ws = connect_ws(server.addr).await;

    ws.send(Message::text(
        r#"{"type": "command", "command": "poke", "data": {"amount": 3}}"#,
    ))
    .await
    .unwrap();
    // Malformed payload and unknown command: logged, dropped, no reply
    ws.send(Message::text(
        r#"{"type": "command", "command": "poke", "data": {"amount": "three"}}"#,
    ))
    .await
    .unwrap();
    ws.send(Message::text(
        r#"{"type": "command", "command": "prod", "data": {}}"#,
    ))
    .await
    .unwrap();

    // Round-trip a subscribe to be sure the commands were processed
    ws.send(Message::text(r#"{"type": "subscribe", "event_types": []}"#))
        .await
        .unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "subscribe");
    assert_eq!(server.poked.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn status_endpoint_requires_basic_auth() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/status", server.addr);

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Basic")
    );

    let response = client
        .get(&url)
        .basic_auth("admin", Some("password"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["user"], "admin");

    let response = client
        .get(&url)
        .basic_auth("admin", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn reload_endpoint_broadcasts_to_clients() {
    let server = spawn_server().await;
    let mut ws = connect_ws(server.addr).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/reload_clients", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame, json!({"type": "reload"}));
}
