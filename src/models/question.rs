// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub text: String,
    /// 1-based display order within the quiz.
    pub position: i32,
}

/// Represents the 'options' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OptionRow {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
}

/// One question inside a create/update quiz request.
///
/// `correct` is the 0-based index into `options` of the right answer.
/// The index bound is checked in the handler since it depends on the
/// sibling `options` field.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 1000, message = "Question text cannot be empty."))]
    pub text: String,
    #[validate(length(min = 1, message = "Each question needs at least one option."))]
    pub options: Vec<String>,
    pub correct: usize,
}

/// Question with its options, shaped for API responses.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub text: String,
    pub position: i32,
    pub options: Vec<OptionView>,
}

/// Option as exposed to clients. `is_correct` is present only for
/// the quiz creator; participants never see the answer key.
#[derive(Debug, Serialize)]
pub struct OptionView {
    pub id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}
