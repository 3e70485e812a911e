//! Control-plane lifecycle preconditions over the real HTTP surface

use std::sync::Arc;

use serde_json::{json, Value};
use tri_arbitrage::server::{router, RobotController};

async fn spawn_control_server() -> String {
    let controller = Arc::new(RobotController::new());
    let app = router(controller);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/robot")
}

fn request_body(market: &str) -> Value {
    json!({
        "market": market,
        "api_key": "key",
        "secret": "secret",
        "delta": 0.1,
        "lot": 100.0,
        "fee": 0.1,
    })
}

#[tokio::test]
async fn test_stop_without_robot_returns_error() {
    let url = spawn_control_server().await;

    let response = reqwest::Client::new().delete(&url).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "robot is not running");
}

#[tokio::test]
async fn test_update_without_robot_returns_error() {
    let url = spawn_control_server().await;

    let response = reqwest::Client::new()
        .put(&url)
        .json(&request_body("BINANCE"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "robot is not running");
}

#[tokio::test]
async fn test_start_with_unknown_market_returns_error() {
    let url = spawn_control_server().await;

    let response = reqwest::Client::new()
        .post(&url)
        .json(&request_body("KRAKEN"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("unsupported market"));
}
