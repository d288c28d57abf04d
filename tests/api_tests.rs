// tests/api_tests.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use quiz_attempts::{
    config::Config, routes, state::AppState, store::MemoryStore, utils::jwt::sign_jwt,
};
use serde_json::{Value, json};

const SECRET: &str = "test_secret_for_integration_tests";
const OWNER: i64 = 100;
const ALICE: i64 = 200;
const BOB: i64 = 300;

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345") and the app state.
async fn spawn_app() -> (String, AppState) {
    let config = Config {
        database_url: None,
        db_max_connections: 1,
        jwt_secret: SECRET.to_string(),
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        scheduler_poll_interval: Duration::from_secs(1),
        scheduler_batch_size: 100,
        scheduler_claim_lease: Duration::from_secs(300),
    };

    let state = AppState::new(Arc::new(MemoryStore::new()), config);
    let app = routes::create_router(state.clone());

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, state)
}

fn bearer(user_id: i64) -> String {
    format!("Bearer {}", sign_jwt(user_id, SECRET, 600).unwrap())
}

/// Two multiple-choice questions (answers "A" and "B"), one minute per attempt.
fn quiz_body() -> Value {
    let now = Utc::now();
    json!({
        "title": "Integration quiz",
        "time_limit_minutes": 1,
        "date_opens": now - ChronoDuration::hours(1),
        "date_closes": now + ChronoDuration::days(7),
        "questions": [
            {"id": "q1", "type": "multiple_choice", "content": "First", "options": ["A", "B", "C"], "correct_answer": "A"},
            {"id": "q2", "type": "multiple_choice", "content": "Second", "options": ["A", "B", "C"], "correct_answer": "B"}
        ]
    })
}

async fn create_quiz(client: &reqwest::Client, address: &str) -> String {
    let response = client
        .post(format!("{}/api/quizzes", address))
        .header("Authorization", bearer(OWNER))
        .json(&quiz_body())
        .send()
        .await
        .expect("Failed to create quiz");
    assert_eq!(response.status().as_u16(), 201);

    let quiz: Value = response.json().await.unwrap();
    quiz["id"].as_str().unwrap().to_string()
}

async fn start_attempt(client: &reqwest::Client, address: &str, quiz_id: &str, user: i64) -> reqwest::Response {
    client
        .post(format!("{}/api/quizzes/{}/attempts", address, quiz_id))
        .header("Authorization", bearer(user))
        .send()
        .await
        .expect("Failed to start attempt")
}

async fn save_answer(
    client: &reqwest::Client,
    address: &str,
    attempt_id: &str,
    question_id: &str,
    answer: &str,
) -> reqwest::Response {
    client
        .put(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .header("Authorization", bearer(ALICE))
        .json(&json!({"question_id": question_id, "selected_answer": answer}))
        .send()
        .await
        .expect("Failed to save answer")
}

async fn submit(client: &reqwest::Client, address: &str, attempt_id: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .expect("Failed to submit")
}

async fn owner_view(client: &reqwest::Client, address: &str, quiz_id: &str) -> Value {
    client
        .get(format!("{}/api/quizzes/{}", address, quiz_id))
        .header("Authorization", bearer(OWNER))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_check_works() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn api_requires_token() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/attempts", address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .get(format!("{}/api/attempts", address))
        .header("Authorization", "Bearer not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn create_quiz_fails_validation() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let mut body = quiz_body();
    body["questions"][0]["options"] = json!(["A"]);

    let response = client
        .post(format!("{}/api/quizzes", address))
        .header("Authorization", bearer(OWNER))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn participants_do_not_see_correct_answers() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    let public: Value = client
        .get(format!("{}/api/quizzes/{}", address, quiz_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(public["questions"][0].get("correct_answer").is_none());

    let full = owner_view(&client, &address, &quiz_id).await;
    assert_eq!(full["questions"][0]["correct_answer"], "A");
}

#[tokio::test]
async fn submit_flow_scores_and_updates_aggregates() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    // Start, then start again: same attempt, resumed.
    let first = start_attempt(&client, &address, &quiz_id, ALICE).await;
    assert_eq!(first.status().as_u16(), 201);
    let attempt: Value = first.json().await.unwrap();
    let attempt_id = attempt["id"].as_str().unwrap().to_string();
    assert_eq!(attempt["status"], "in_progress");
    assert!(attempt["score"].is_null());

    let again = start_attempt(&client, &address, &quiz_id, ALICE).await;
    assert_eq!(again.status().as_u16(), 200);
    let again: Value = again.json().await.unwrap();
    assert_eq!(again["id"], attempt["id"]);

    assert_eq!(save_answer(&client, &address, &attempt_id, "q1", "A").await.status().as_u16(), 200);
    let saved = save_answer(&client, &address, &attempt_id, "q2", "C").await;
    let saved: Value = saved.json().await.unwrap();
    assert_eq!(
        saved["answers"],
        json!([
            {"question_id": "q1", "selected_answer": "A"},
            {"question_id": "q2", "selected_answer": "C"}
        ])
    );

    let response = submit(&client, &address, &attempt_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["attempt"]["status"], "submitted");
    assert_eq!(result["attempt"]["score"], 1);
    assert_eq!(result["quiz"]["attempt_count"], 1);
    assert_eq!(result["quiz"]["total_score"], 1);

    // Second submit is reported, not counted.
    let response = submit(&client, &address, &attempt_id).await;
    assert_eq!(response.status().as_u16(), 409);

    // Saving after submit is rejected.
    let response = save_answer(&client, &address, &attempt_id, "q2", "B").await;
    assert_eq!(response.status().as_u16(), 409);

    let quiz = owner_view(&client, &address, &quiz_id).await;
    assert_eq!(quiz["attempt_count"], 1);
    assert_eq!(quiz["total_score"], 1);
}

#[tokio::test]
async fn deadline_auto_submits_without_client() {
    let (address, state) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    let attempt: Value = start_attempt(&client, &address, &quiz_id, ALICE)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = attempt["id"].as_str().unwrap().to_string();
    save_answer(&client, &address, &attempt_id, "q1", "A").await;
    save_answer(&client, &address, &attempt_id, "q2", "C").await;

    // Scan as if the clock were past the deadline.
    let report = state
        .poller()
        .run_due(Utc::now() + ChronoDuration::minutes(2))
        .await
        .unwrap();
    assert_eq!(report.completed, 1);

    let fetched: Value = client
        .get(format!("{}/api/attempts/{}", address, attempt_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "submitted");
    assert_eq!(fetched["score"], 1);

    let response = submit(&client, &address, &attempt_id).await;
    assert_eq!(response.status().as_u16(), 409);

    let quiz = owner_view(&client, &address, &quiz_id).await;
    assert_eq!(quiz["attempt_count"], 1);
    assert_eq!(quiz["total_score"], 1);
}

#[tokio::test]
async fn cleared_answer_scores_zero() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    let attempt: Value = start_attempt(&client, &address, &quiz_id, ALICE)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    save_answer(&client, &address, &attempt_id, "q1", "A").await;
    save_answer(&client, &address, &attempt_id, "q2", "B").await;
    let cleared: Value = save_answer(&client, &address, &attempt_id, "q1", "")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["answers"].as_array().unwrap().len(), 1);

    let result: Value = submit(&client, &address, &attempt_id).await.json().await.unwrap();
    assert_eq!(result["attempt"]["score"], 1);
}

#[tokio::test]
async fn attempt_visibility_and_submissions_listing() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    let attempt: Value = start_attempt(&client, &address, &quiz_id, ALICE)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    // Another participant cannot read or write it; the owner can read it.
    let response = client
        .get(format!("{}/api/attempts/{}", address, attempt_id))
        .header("Authorization", bearer(BOB))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .header("Authorization", bearer(BOB))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .get(format!("{}/api/attempts/{}", address, attempt_id))
        .header("Authorization", bearer(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    submit(&client, &address, &attempt_id).await;

    let response = client
        .get(format!("{}/api/quizzes/{}/submissions", address, quiz_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let submissions: Vec<Value> = client
        .get(format!("{}/api/quizzes/{}/submissions", address, quiz_id))
        .header("Authorization", bearer(OWNER))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["id"], attempt["id"]);

    let mine: Vec<Value> = client
        .get(format!("{}/api/attempts", address))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn deleted_quiz_blocks_finalization() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let quiz_id = create_quiz(&client, &address).await;

    let attempt: Value = start_attempt(&client, &address, &quiz_id, ALICE)
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = attempt["id"].as_str().unwrap().to_string();

    let response = client
        .delete(format!("{}/api/quizzes/{}", address, quiz_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = client
        .delete(format!("{}/api/quizzes/{}", address, quiz_id))
        .header("Authorization", bearer(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = submit(&client, &address, &attempt_id).await;
    assert_eq!(response.status().as_u16(), 409);

    let fetched: Value = client
        .get(format!("{}/api/attempts/{}", address, attempt_id))
        .header("Authorization", bearer(ALICE))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "in_progress");

    let response = start_attempt(&client, &address, &quiz_id, ALICE).await;
    assert_eq!(response.status().as_u16(), 404);
}
