// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::question::{QuestionInput, QuestionView};

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,

    pub title: String,

    pub description: Option<String>,

    /// Six-character join code (A-Z, 0-9), unique across all quizzes.
    pub code: String,

    pub creator_id: i64,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Time limit in minutes. 0 means unlimited.
    pub time_limit: i32,

    /// Maximum number of participants. 0 means unlimited.
    pub user_limit: i32,

    pub is_active: bool,
}

/// DTO for creating a quiz with its full question set.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title length must be between 1 and 200 characters."
    ))]
    pub title: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    /// Minutes; omitted or 0 means no time limit.
    #[validate(range(min = 0, message = "Time limit cannot be negative."))]
    pub time_limit: Option<i32>,

    /// Participant cap; omitted or 0 means unlimited.
    #[validate(range(min = 0, message = "User limit cannot be negative."))]
    pub user_limit: Option<i32>,

    #[validate(nested, length(min = 1, message = "Please add at least one question."))]
    pub questions: Vec<QuestionInput>,
}

/// Quiz row enriched with counts for the creator's dashboard.
#[derive(Debug, Serialize, FromRow)]
pub struct QuizSummary {
    pub id: i64,
    pub title: String,
    pub code: String,
    pub is_active: bool,
    pub time_limit: i32,
    pub user_limit: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub question_count: i64,
    pub attempt_count: i64,
}

/// Full quiz document with ordered questions.
/// Option answer keys are stripped unless the caller is the creator.
#[derive(Debug, Serialize)]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionView>,
}

/// Dashboard payload: quizzes the user created plus their own attempts.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub quizzes: Vec<QuizSummary>,
    pub attempts: Vec<crate::models::attempt::MyAttempt>,
}
