//! Integration test: start the gateway on a free port, GET /, assert the liveness text and CORS.
//! The server task is left running when the test ends.

mod common;

use beacon::gateway::HEALTH_TEXT;

#[tokio::test]
async fn gateway_health_http_responds_with_running() {
    let port = common::spawn_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .expect("GET /");
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.expect("body"), HEALTH_TEXT);
}

#[tokio::test]
async fn gateway_allows_any_origin_by_default() {
    let port = common::spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/", port))
        .header("Origin", "https://someone.github.io")
        .send()
        .await
        .expect("GET / with Origin");
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let port = common::spawn_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/rooms", port))
        .await
        .expect("GET /rooms");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
