//! Contract tests for conversation history endpoints.

use serde_json::{json, Value};

use super::harness::TestServer;

async fn history(server: &TestServer, session: &str) -> Value {
    server
        .client
        .get(server.url(&format!("/api/agent/sessions/{session}/history")))
        .send()
        .await
        .expect("get")
        .json()
        .await
        .expect("json")
}

#[tokio::test]
async fn unknown_session_has_empty_history() {
    let server = TestServer::start("cat").await;
    let body = history(&server, "nobody").await;

    assert_eq!(body["data"]["sessionId"], "nobody");
    assert_eq!(body["data"]["history"], json!([]));
}

#[tokio::test]
async fn completed_exchange_is_recorded_then_cleared() {
    let server = TestServer::start("cat").await;
    let id = server
        .submit(json!({ "prompt": "hello", "sessionId": "s1" }))
        .await;
    server.wait_terminal(&id).await;

    let body = history(&server, "s1").await;
    assert_eq!(
        body["data"]["history"],
        json!([
            { "role": "user", "content": "hello" },
            { "role": "assistant", "content": "hello" },
        ])
    );

    let cleared: Value = server
        .client
        .delete(server.url("/api/agent/sessions/s1/history"))
        .send()
        .await
        .expect("delete")
        .json()
        .await
        .expect("json");
    assert_eq!(cleared["data"]["cleared"], true);

    let body = history(&server, "s1").await;
    assert_eq!(body["data"]["history"], json!([]));
}

#[tokio::test]
async fn failed_exchange_is_not_recorded() {
    let server = TestServer::start("exit 1").await;
    let id = server
        .submit(json!({ "prompt": "hello", "sessionId": "s2" }))
        .await;
    server.wait_terminal(&id).await;

    let body = history(&server, "s2").await;
    assert_eq!(body["data"]["history"], json!([]));
}
