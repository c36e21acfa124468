// tests/api_tests.rs
//
// End-to-end tests against a real Postgres. These are #[ignore]d so the
// suite passes on machines without a database; run them with
//   DATABASE_URL=... cargo test -- --ignored

use quizroom_backend::{config::Config, routes, state::AppState};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345").
async fn spawn_app() -> String {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    // 1. Create a pool
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    // 2. Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    // 3. Create test configuration and state
    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        google_client_id: None,
        google_client_secret: None,
        google_redirect_url: None,
    };

    let state = AppState {
        pool,
        config,
        http: reqwest::Client::new(),
    };

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

fn unique_email() -> String {
    format!("u_{}@example.com", &uuid::Uuid::new_v4().to_string()[..8])
}

/// Registers a user and returns their bearer token.
async fn register_and_login(client: &reqwest::Client, address: &str, email: &str) -> String {
    let resp = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "name": "Test User",
            "email": email,
            "password": "password123"
        }))
        .send()
        .await
        .expect("Register failed");
    assert_eq!(resp.status().as_u16(), 201);

    let login: serde_json::Value = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "email": email,
            "password": "password123"
        }))
        .send()
        .await
        .expect("Login failed")
        .json()
        .await
        .expect("Failed to parse login json");

    login["token"].as_str().expect("Token not found").to_string()
}

/// Creates a two-question quiz and returns its join code.
async fn create_quiz(client: &reqwest::Client, address: &str, token: &str) -> String {
    let resp = client
        .post(format!("{}/api/quizzes", address))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "title": "Capitals of Europe",
            "description": "Two easy ones",
            "time_limit": 0,
            "user_limit": 0,
            "questions": [
                { "text": "Capital of France?", "options": ["Paris", "Lyon"], "correct": 0 },
                { "text": "Capital of Spain?", "options": ["Seville", "Madrid"], "correct": 1 }
            ]
        }))
        .send()
        .await
        .expect("Create quiz failed");
    assert_eq!(resp.status().as_u16(), 201);

    let body: serde_json::Value = resp.json().await.unwrap();
    body["code"].as_str().expect("Code not found").to_string()
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn unknown_route_is_404() {
    // Arrange
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Act
    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn register_fails_validation() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Password too short
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "name": "Test User",
            "email": unique_email(),
            "password": "abc"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn duplicate_email_is_conflict() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let email = unique_email();

    register_and_login(&client, &address, &email).await;

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "name": "Someone Else",
            "email": email,
            "password": "password456"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn protected_routes_require_token() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/dashboard", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn full_quiz_flow() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    // Creator authors a quiz
    let creator_token = register_and_login(&client, &address, &unique_email()).await;
    let code = create_quiz(&client, &address, &creator_token).await;

    // Participant joins by code (lowercase input must still match)
    let taker_token = register_and_login(&client, &address, &unique_email()).await;
    let join: serde_json::Value = client
        .post(format!("{}/api/quizzes/join", address))
        .bearer_auth(&taker_token)
        .json(&serde_json::json!({ "code": code.to_lowercase() }))
        .send()
        .await
        .expect("Join failed")
        .json()
        .await
        .unwrap();
    assert_eq!(join["code"].as_str().unwrap(), code);

    // Take page: questions come without the answer key
    let take: serde_json::Value = client
        .get(format!("{}/api/quizzes/{}/take", address, code))
        .bearer_auth(&taker_token)
        .send()
        .await
        .expect("Take failed")
        .json()
        .await
        .unwrap();
    let questions = take["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    assert!(questions[0]["options"][0].get("is_correct").is_none());

    // Start the attempt
    let start: serde_json::Value = client
        .post(format!("{}/api/quizzes/{}/start", address, code))
        .bearer_auth(&taker_token)
        .send()
        .await
        .expect("Start failed")
        .json()
        .await
        .unwrap();
    assert_eq!(start["status"], "ok");

    // Answer question 1 correctly ("Paris") and question 2 wrongly ("Seville")
    let detail: serde_json::Value = client
        .get(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&creator_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let qs = detail["questions"].as_array().unwrap();
    let mut answers: HashMap<String, i64> = HashMap::new();
    for q in qs {
        let opts = q["options"].as_array().unwrap();
        let pick = if q["position"].as_i64() == Some(1) {
            opts.iter().find(|o| o["is_correct"] == true).unwrap()
        } else {
            opts.iter().find(|o| o["is_correct"] == false).unwrap()
        };
        answers.insert(q["id"].as_i64().unwrap().to_string(), pick["id"].as_i64().unwrap());
    }

    let result: serde_json::Value = client
        .post(format!("{}/api/quizzes/{}/submit", address, code))
        .bearer_auth(&taker_token)
        .json(&serde_json::json!({ "answers": answers }))
        .send()
        .await
        .expect("Submit failed")
        .json()
        .await
        .unwrap();

    assert_eq!(result["score"], 1);
    assert_eq!(result["total"], 2);
    assert_eq!(result["rank"], 1);
    assert_eq!(result["total_attempts"], 1);

    // A second submission of the same attempt is rejected
    let resubmit = client
        .post(format!("{}/api/quizzes/{}/submit", address, code))
        .bearer_auth(&taker_token)
        .json(&serde_json::json!({ "answers": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resubmit.status().as_u16(), 400);

    // And the quiz cannot be taken twice
    let retake = client
        .get(format!("{}/api/quizzes/{}/take", address, code))
        .bearer_auth(&taker_token)
        .send()
        .await
        .unwrap();
    assert_eq!(retake.status().as_u16(), 409);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn answer_key_is_creator_only() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let creator_token = register_and_login(&client, &address, &unique_email()).await;
    let code = create_quiz(&client, &address, &creator_token).await;

    let as_creator: serde_json::Value = client
        .get(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&creator_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(as_creator["questions"][0]["options"][0].get("is_correct").is_some());

    let other_token = register_and_login(&client, &address, &unique_email()).await;
    let as_other: serde_json::Value = client
        .get(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&other_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(as_other["questions"][0]["options"][0].get("is_correct").is_none());
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn only_creator_can_edit_or_delete() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let creator_token = register_and_login(&client, &address, &unique_email()).await;
    let code = create_quiz(&client, &address, &creator_token).await;

    let other_token = register_and_login(&client, &address, &unique_email()).await;

    let edit = client
        .put(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&other_token)
        .json(&serde_json::json!({
            "title": "Hijacked",
            "questions": [
                { "text": "Q?", "options": ["A", "B"], "correct": 0 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(edit.status().as_u16(), 403);

    let delete = client
        .delete(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&other_token)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status().as_u16(), 403);

    // The creator can delete, and the code stops resolving
    let delete = client
        .delete(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&creator_token)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status().as_u16(), 200);

    let gone = client
        .get(format!("{}/api/quizzes/{}", address, code))
        .bearer_auth(&creator_token)
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status().as_u16(), 404);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn user_limit_blocks_extra_participants() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let creator_token = register_and_login(&client, &address, &unique_email()).await;
    let resp: serde_json::Value = client
        .post(format!("{}/api/quizzes", address))
        .bearer_auth(&creator_token)
        .json(&serde_json::json!({
            "title": "One seat only",
            "user_limit": 1,
            "questions": [
                { "text": "Q?", "options": ["A", "B"], "correct": 0 }
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = resp["code"].as_str().unwrap();

    // First participant takes the only seat
    let first_token = register_and_login(&client, &address, &unique_email()).await;
    let start = client
        .post(format!("{}/api/quizzes/{}/start", address, code))
        .bearer_auth(&first_token)
        .send()
        .await
        .unwrap();
    assert_eq!(start.status().as_u16(), 200);

    // Second participant is turned away
    let second_token = register_and_login(&client, &address, &unique_email()).await;
    let start = client
        .post(format!("{}/api/quizzes/{}/start", address, code))
        .bearer_auth(&second_token)
        .send()
        .await
        .unwrap();
    assert_eq!(start.status().as_u16(), 400);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn expired_submission_voids_the_attempt() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let creator_token = register_and_login(&client, &address, &unique_email()).await;
    let resp: serde_json::Value = client
        .post(format!("{}/api/quizzes", address))
        .bearer_auth(&creator_token)
        .json(&serde_json::json!({
            "title": "Beat the clock",
            "time_limit": 1,
            "questions": [
                { "text": "Q?", "options": ["A", "B"], "correct": 0 }
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = resp["code"].as_str().unwrap();

    let taker_token = register_and_login(&client, &address, &unique_email()).await;
    let start = client
        .post(format!("{}/api/quizzes/{}/start", address, code))
        .bearer_auth(&taker_token)
        .send()
        .await
        .unwrap();
    assert_eq!(start.status().as_u16(), 200);

    // Backdate the attempt well past the 1-minute limit plus grace
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test DB");
    sqlx::query(
        r#"
        UPDATE attempts
        SET started_at = NOW() - INTERVAL '10 minutes'
        WHERE quiz_id = (SELECT id FROM quizzes WHERE code = $1)
        "#,
    )
    .bind(code)
    .execute(&pool)
    .await
    .unwrap();

    let submit = client
        .post(format!("{}/api/quizzes/{}/submit", address, code))
        .bearer_auth(&taker_token)
        .json(&serde_json::json!({ "answers": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(submit.status().as_u16(), 400);
    let body: serde_json::Value = submit.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Time expired"));

    // The voided attempt leaves no row behind
    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM attempts WHERE quiz_id = (SELECT id FROM quizzes WHERE code = $1)",
    )
    .bind(code)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(remaining, 0);

    // With the attempt gone, the quiz can be taken again
    let retake = client
        .get(format!("{}/api/quizzes/{}/take", address, code))
        .bearer_auth(&taker_token)
        .send()
        .await
        .unwrap();
    assert_eq!(retake.status().as_u16(), 200);
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn join_code_allocation_survives_many_creates() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address, &unique_email()).await;

    // Code allocation retries internally on collision; every create must
    // come back 201 with a distinct code, never a collision error.
    let mut codes = std::collections::HashSet::new();
    for _ in 0..25 {
        let code = create_quiz(&client, &address, &token).await;
        assert!(codes.insert(code), "duplicate join code handed out");
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres (DATABASE_URL)"]
async fn create_quiz_rejects_bad_question_sets() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address, &unique_email()).await;

    // No questions at all
    let resp = client
        .post(format!("{}/api/quizzes", address))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "title": "Empty", "questions": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Correct index out of range
    let resp = client
        .post(format!("{}/api/quizzes", address))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "title": "Broken",
            "questions": [
                { "text": "Q?", "options": ["A", "B"], "correct": 2 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
