//! Integration tests for the HTTP API over a real socket.
//!
//! A server is bound on an ephemeral port and driven with `reqwest`, the
//! way the frontend and the auth gateway talk to it.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eco_tutor::{
    create_router, AppState, Catalog, Config, MemoryStore, TurnGenerator, TurnReply, TurnRequest,
};
use serde_json::{json, Value};

const FRAGMENTATION: &str = "5d8f2c1a-6b3e-4f7a-9c0d-1e2f3a4b5c6d";
const PROFESSOR: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
const STUDENT: &str = "3c4d5e6f-7a8b-4c9d-8e0f-1a2b3c4d5e6f";

struct StageEcho;

#[async_trait]
impl TurnGenerator for StageEcho {
    async fn generate(&self, request: TurnRequest<'_>) -> eco_tutor::Result<TurnReply> {
        Ok(TurnReply::text(format!(
            "[{}] {}",
            request.stage.title(),
            request.user_text
        )))
    }
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns a server over the fixture catalog and returns its base URL.
async fn spawn_test_server(config: Config) -> (String, tokio::task::JoinHandle<()>) {
    let store = Arc::new(MemoryStore::new());
    let catalog = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/catalog.json");
    Catalog::load(&catalog)
        .expect("Failed to load catalog")
        .seed(&*store)
        .await
        .expect("Failed to seed catalog");

    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let router = create_router(AppState::new(config, store, Arc::new(StageEcho)));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

fn as_student(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    builder
        .header("x-user-id", STUDENT)
        .header("x-user-role", "student")
}

fn as_professor(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    builder
        .header("x-user-id", PROFESSOR)
        .header("x-user-role", "professor")
}

#[tokio::test]
async fn test_health_check() {
    let (base, handle) = spawn_test_server(Config::default()).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    handle.abort();
}

/// A student opens the chat, talks through a stage change, and the
/// professor then sees, grades and exports the session.
#[tokio::test]
async fn test_student_and_professor_flow() {
    let (base, handle) = spawn_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let listed: Value = as_student(client.get(format!("{base}/api/assignments/student")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert!(listed
        .as_array()
        .unwrap()
        .iter()
        .all(|a| a["studentProgress"].is_null()));

    let session: Value = as_student(client.get(format!("{base}/api/chat/session/{FRAGMENTATION}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["messages"].as_array().unwrap().len(), 1);

    let mut last = Value::Null;
    for text in [
        "What is fragmentation per se?",
        "How is it measured?",
        "Why does the patch scale mislead?",
    ] {
        let response = as_student(client.post(format!("{base}/api/chat/message")))
            .json(&json!({ "chatSessionId": session_id, "text": text }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        last = response.json().await.unwrap();
    }
    assert_eq!(last["newStage"], "Evidence");
    assert_eq!(
        last["aiMessage"]["text"],
        "Great progress! Let's move to the next stage: **Evidence Gathering**. \
[Evidence Gathering] Why does the patch scale mislead?"
    );
    assert_eq!(last["aiMessage"]["ordinal"], 6);

    let listed: Value = as_student(client.get(format!("{base}/api/assignments/student")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let progress = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["id"] == FRAGMENTATION)
        .map(|a| a["studentProgress"].clone())
        .unwrap();
    assert_eq!(progress["currentStage"], "Evidence");
    assert_eq!(progress["userMessageCount"], 3);

    let stats: Value = as_professor(client.get(format!("{base}/api/assignments/{FRAGMENTATION}/stats")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalStudents"], 1);
    assert_eq!(stats["stageDistribution"]["Evidence"], 1);
    assert_eq!(stats["studentDetails"][0]["messageCount"], 7);

    let response = as_professor(client.put(format!("{base}/api/sessions/{session_id}/grade")))
        .json(&json!({
            "overallScore": 24,
            "rubricScores": [
                { "criterion": "Comprehension", "score": 9, "maxPoints": 10 },
                { "criterion": "Evidence", "score": 8, "maxPoints": 10 },
                { "criterion": "Analysis", "score": 7, "maxPoints": 10 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = as_professor(client.get(format!("{base}/api/sessions/{session_id}/transcript")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("transcript-week-3-habitat-fragmentation-"));
    let markdown = response.text().await.unwrap();
    assert!(markdown.contains("| Stage | Evidence Gathering |"));
    assert!(markdown.contains("| Analysis | 7 / 10 |"));

    handle.abort();
}

#[tokio::test]
async fn test_rejections() {
    let (base, handle) = spawn_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/api/assignments/student"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = as_student(client.get(format!("{base}/api/assignments/professor")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = as_student(client.get(format!(
        "{base}/api/chat/session/{}",
        uuid::Uuid::new_v4()
    )))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), 404);

    let session: Value = as_student(client.get(format!("{base}/api/chat/session/{FRAGMENTATION}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let response = as_student(client.post(format!("{base}/api/chat/message")))
        .json(&json!({ "chatSessionId": session["id"], "text": "x".repeat(5001) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!("{base}/api/sessions/{}", session["id"].as_str().unwrap()))
        .header("x-user-id", uuid::Uuid::new_v4().to_string())
        .header("x-user-role", "professor")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    handle.abort();
}

/// A professor edits an assignment, can delete it only while no student has
/// opened it, and sees the sessions that block the deletion.
#[tokio::test]
async fn test_assignment_lifecycle() {
    let (base, handle) = spawn_test_server(Config::default()).await;
    let client = reqwest::Client::new();

    let created: Value = as_professor(client.post(format!("{base}/api/assignments")))
        .json(&json!({
            "title": "Week 6: Matrix quality",
            "article": {
                "title": "Matrix Matters",
                "author": "Ricketts",
                "year": 2001,
                "content": "The matrix between patches shapes movement."
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let response = as_professor(client.put(format!("{base}/api/assignments/{id}")))
        .json(&json!({ "description": "Focus on the permeability argument." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let fetched: Value = as_student(client.get(format!("{base}/api/assignments/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["description"], "Focus on the permeability argument.");
    assert!(fetched.get("chatSessions").is_none());

    as_student(client.get(format!("{base}/api/chat/session/{id}")))
        .send()
        .await
        .unwrap();
    let owned: Value = as_professor(client.get(format!("{base}/api/assignments/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(owned["chatSessions"].as_array().unwrap().len(), 1);

    let response = as_professor(client.delete(format!("{base}/api/assignments/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["studentCount"], 1);

    // The seeded assignment without sessions can go.
    let listed: Value = as_professor(client.get(format!("{base}/api/assignments/professor")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let idle = listed
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["stats"]["totalStudents"] == 0)
        .map(|a| a["id"].as_str().unwrap().to_string())
        .unwrap();
    let response = as_professor(client.delete(format!("{base}/api/assignments/{idle}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    handle.abort();
}

#[tokio::test]
async fn test_gateway_token() {
    let config = Config {
        gateway_token: Some("gateway-secret".to_string()),
        ..Config::default()
    };
    let (base, handle) = spawn_test_server(config).await;
    let client = reqwest::Client::new();

    let response = as_student(client.get(format!("{base}/api/assignments/student")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = as_student(client.get(format!("{base}/api/assignments/student")))
        .bearer_auth("gateway-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Health stays open for probes.
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    handle.abort();
}
