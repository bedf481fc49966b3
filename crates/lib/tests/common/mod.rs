//! Shared helpers: start a gateway on a free port and talk to it over WebSocket.

#![allow(dead_code)]

use beacon::config::Config;
use beacon::gateway;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

pub type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Start the gateway and wait until `GET /` answers. The server task is left running.
pub async fn spawn_gateway() -> u16 {
    let port = free_port();
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    tokio::spawn(async move {
        let _ = gateway::run_gateway(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return port;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway on port {} did not come up within 5s", port);
}

/// Open a WebSocket that appears to come from `origin` (via X-Forwarded-For).
pub async fn connect(port: u16, origin: &str) -> Ws {
    let mut request = format!("ws://127.0.0.1:{}/ws", port)
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "x-forwarded-for",
        HeaderValue::from_str(origin).expect("header value"),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_join(ws: &mut Ws, payload: serde_json::Value) {
    let frame = serde_json::json!({ "type": "event", "event": "join", "payload": payload });
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("send join");
}

/// Next text frame, parsed. Fails the test after 5s.
pub async fn next_event(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("event JSON");
        }
    }
}

/// Assert no text frame arrives for a short while.
pub async fn expect_silence(ws: &mut Ws) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        tokio::time::timeout(Duration::from_millis(300), ws.next()).await
    {
        panic!("unexpected event: {}", text);
    }
}
