// tests/api_tests.rs

use api_lib::{
    config::Config,
    web::{create_router, AppState},
};
use clicker_core::memory::{
    InMemoryProgressStore, InMemorySessionStore, StaticAchievementCatalog, StaticRoster,
};
use clicker_core::{EnginePorts, SystemClock};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

const ADMIN_TOKEN: &str = "test-admin-token";

/// Spawns the app on a random port against in-memory ports.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
async fn spawn_app() -> String {
    let config = Arc::new(Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: Level::ERROR,
        stale_session_ttl_hours: 12,
        store_retry_attempts: 3,
        store_retry_base_ms: 1,
        max_write_attempts: 16,
        admin_token: Some(ADMIN_TOKEN.to_string()),
        cors_origin: "http://localhost:3000".to_string(),
    });
    let ports = EnginePorts {
        sessions: Arc::new(InMemorySessionStore::new()),
        enrollment: Arc::new(StaticRoster::new()),
        progress: Arc::new(InMemoryProgressStore::new()),
        achievements: Arc::new(StaticAchievementCatalog::default()),
        clock: Arc::new(SystemClock),
    };
    let app = create_router(Arc::new(AppState::new(ports, config)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

async fn create_session(client: &reqwest::Client, address: &str, owner: Uuid, body: Value) -> Value {
    let response = client
        .post(format!("{}/sessions", address))
        .header("x-user-id", owner.to_string())
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let address = spawn_app().await;
    let response = reqwest::get(format!("{}/random_path_that_does_not_exist", address))
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn creating_a_session_requires_an_identity() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sessions", address))
        .json(&json!({ "title": "Quiz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let response = client
        .post(format!("{}/sessions", address))
        .header("x-user-id", "not-a-uuid")
        .json(&json!({ "title": "Quiz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn live_session_flow() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let owner = Uuid::new_v4();

    let session = create_session(&client, &address, owner, json!({ "code": "math01", "title": "Math" })).await;
    assert_eq!(session["code"], "MATH01");
    assert_eq!(session["status"], "waiting");

    // Owner activates a question.
    let response = client
        .post(format!("{}/sessions/MATH01/questions", address))
        .header("x-user-id", owner.to_string())
        .json(&json!({
            "text": "2 + 2 = ?",
            "type": "multiple_choice",
            "options": ["3", "4", "5"],
            "correct_answer": "4",
            "time_limit_seconds": 30
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // A participant joins and polls; the answer key stays hidden.
    let joined: Value = client
        .post(format!("{}/sessions/math01/join", address))
        .json(&json!({ "name": "Ada", "device_id": "tablet-7" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(joined["is_reconnect"], false);
    let participant_id = joined["participant_id"].as_str().unwrap().to_string();

    let current: Value = client
        .get(format!("{}/sessions/MATH01/current-question", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["status"], "active");
    assert!(current["question"].get("correct_answer").is_none());
    let question_id = current["question"]["id"].as_str().unwrap().to_string();

    let submit = |answer: Value| {
        client
            .post(format!("{}/sessions/MATH01/responses", address))
            .json(&json!({
                "participant_id": participant_id,
                "question_id": question_id,
                "answer": answer
            }))
            .send()
    };
    let first: Value = submit(json!("4")).await.unwrap().json().await.unwrap();
    assert_eq!(first["is_duplicate"], false);
    let again = submit(json!(3)).await.unwrap();
    assert_eq!(again.status().as_u16(), 200);
    let again: Value = again.json().await.unwrap();
    assert_eq!(again["is_duplicate"], true);
    assert_eq!(again["response_id"], first["response_id"]);

    // Closing the question makes further answers late.
    client
        .post(format!("{}/sessions/MATH01/current-question/close", address))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap();
    let late = submit(json!("4")).await.unwrap();
    assert_eq!(late.status().as_u16(), 409);
    let late: Value = late.json().await.unwrap();
    assert_eq!(late["error"], "late_submission");

    // Only the owner can end the session.
    let stranger = client
        .post(format!("{}/sessions/MATH01/end", address))
        .header("x-user-id", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(stranger.status().as_u16(), 403);

    let ended: Value = client
        .post(format!("{}/sessions/MATH01/end", address))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ended["session"]["status"], "ended");
    assert_eq!(ended["report"]["scores"][0]["points"], 16);
    assert_eq!(ended["session"]["aggregation_pending"], false);

    let session_id = ended["session"]["session_id"].as_str().unwrap().to_string();
    let rescored = client
        .post(format!("{}/session-records/{}/rescore", address, session_id))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(rescored.status().as_u16(), 200);
    let rescored: Value = rescored.json().await.unwrap();
    assert_eq!(rescored["scores"][0]["points"], 16);

    let results: Value = client
        .get(format!("{}/sessions/MATH01/results", address))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["questions"][0]["correct_count"], 1);

    let rejoin = client
        .post(format!("{}/sessions/MATH01/join", address))
        .json(&json!({ "name": "Ada", "device_id": "tablet-7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejoin.status().as_u16(), 409);
    let rejoin: Value = rejoin.json().await.unwrap();
    assert_eq!(rejoin["error"], "session_ended");
}

#[tokio::test]
async fn login_required_join_returns_context() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let owner = Uuid::new_v4();
    create_session(
        &client,
        &address,
        owner,
        json!({ "code": "SECURE", "title": "Members only", "require_login": true }),
    )
    .await;

    let response = client
        .post(format!("{}/sessions/SECURE/join", address))
        .json(&json!({ "name": "Guest" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "auth_required");
    assert_eq!(body["context"]["session_code"], "SECURE");
    assert_eq!(body["context"]["session_title"], "Members only");

    let response = client
        .post(format!("{}/sessions/SECURE/join", address))
        .header("x-user-id", Uuid::new_v4().to_string())
        .json(&json!({ "name": "Member" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn admin_sweep_requires_the_token() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let denied = client
        .post(format!("{}/admin/sweep-duplicates", address))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let allowed = client
        .post(format!("{}/admin/sweep-duplicates", address))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status().as_u16(), 200);
    let report: Value = allowed.json().await.unwrap();
    assert_eq!(report["codes_examined"], 0);

    let denied = client
        .post(format!("{}/admin/aggregate-pending", address))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let pending: Value = client
        .post(format!("{}/admin/aggregate-pending", address))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending["sessions_examined"], 0);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let address = spawn_app().await;
    let doc: Value = reqwest::get(format!("{}/api-docs/openapi.json", address))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"].get("/sessions/{code}/join").is_some());
}
