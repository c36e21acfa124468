// src/models/attempt.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// Represents the 'attempts' table in the database.
/// UNIQUE (quiz_id, user_id) caps each user at one attempt per quiz.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub score: i32,
    /// Number of questions at the time the attempt started.
    pub total: i32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Attempt joined with quiz title/code for the dashboard.
#[derive(Debug, Serialize, FromRow)]
pub struct MyAttempt {
    pub id: i64,
    pub quiz_title: String,
    pub quiz_code: String,
    pub score: i32,
    pub total: i32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for joining a quiz by code.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub code: String,
}

/// DTO for submitting answers.
///
/// Key: Question ID. Value: selected Option ID.
/// Unanswered questions are simply absent from the map.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub answers: HashMap<i64, i64>,
}

/// Result payload returned right after submission.
#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub score: i32,
    pub total: i32,
    /// 1-based rank among all attempts on the quiz (strictly-greater
    /// scores rank above; equal scores share a rank).
    pub rank: i64,
    pub total_attempts: i64,
}
