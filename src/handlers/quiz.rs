// src/handlers/quiz.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    models::{
        attempt::MyAttempt,
        question::{OptionRow, OptionView, Question, QuestionInput, QuestionView},
        quiz::{CreateQuizRequest, DashboardResponse, Quiz, QuizDetail, QuizSummary},
    },
    utils::{code::gen_code, jwt::Claims},
};

/// Looks up a quiz by its join code.
pub(crate) async fn quiz_by_code(pool: &PgPool, code: &str) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(
        r#"
        SELECT id, title, description, code, creator_id, created_at,
               time_limit, user_limit, is_active
        FROM quizzes
        WHERE code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

/// Cross-field checks the validator derive cannot express: the correct
/// option index must point into the question's own option list, and no
/// option text may be blank or oversized.
pub(crate) fn validate_question_set(questions: &[QuestionInput]) -> Result<(), AppError> {
    for (i, q) in questions.iter().enumerate() {
        if q.correct >= q.options.len() {
            return Err(AppError::BadRequest(format!(
                "Question {}: correct option index {} is out of range",
                i + 1,
                q.correct
            )));
        }
        for opt in &q.options {
            if opt.trim().is_empty() {
                return Err(AppError::BadRequest(format!(
                    "Question {}: options cannot be blank",
                    i + 1
                )));
            }
            if opt.len() > 300 {
                return Err(AppError::BadRequest(format!(
                    "Question {}: option text is limited to 300 characters",
                    i + 1
                )));
            }
        }
    }
    Ok(())
}

/// Inserts a full question set for a quiz, assigning 1-based positions
/// in request order. Runs inside the caller's transaction.
async fn insert_questions(
    tx: &mut Transaction<'_, Postgres>,
    quiz_id: i64,
    questions: &[QuestionInput],
) -> Result<(), AppError> {
    for (i, q) in questions.iter().enumerate() {
        let question_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO questions (quiz_id, text, "position")
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(quiz_id)
        .bind(&q.text)
        .bind((i + 1) as i32)
        .fetch_one(&mut **tx)
        .await?;

        for (j, opt_text) in q.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO options (question_id, text, is_correct)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(question_id)
            .bind(opt_text)
            .bind(j == q.correct)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

/// Loads a quiz's questions in display order, each with its options.
/// `reveal_answers` controls whether `is_correct` is included.
pub(crate) async fn load_questions(
    pool: &PgPool,
    quiz_id: i64,
    reveal_answers: bool,
) -> Result<Vec<QuestionView>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, quiz_id, text, "position"
        FROM questions
        WHERE quiz_id = $1
        ORDER BY "position"
        "#,
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;

    let options = sqlx::query_as::<_, OptionRow>(
        r#"
        SELECT o.id, o.question_id, o.text, o.is_correct
        FROM options o
        JOIN questions q ON o.question_id = q.id
        WHERE q.quiz_id = $1
        ORDER BY o.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(pool)
    .await?;

    let mut by_question: HashMap<i64, Vec<OptionView>> = HashMap::new();
    for opt in options {
        by_question.entry(opt.question_id).or_default().push(OptionView {
            id: opt.id,
            text: opt.text,
            is_correct: reveal_answers.then_some(opt.is_correct),
        });
    }

    Ok(questions
        .into_iter()
        .map(|q| QuestionView {
            options: by_question.remove(&q.id).unwrap_or_default(),
            id: q.id,
            text: q.text,
            position: q.position,
        })
        .collect())
}

/// Attempts to allocate a join code on the quizzes table.
const CODE_ALLOC_RETRIES: usize = 5;

/// Creates a quiz with its questions and options in one transaction.
///
/// The join code is drawn at random and the INSERT relies on the
/// unique index on `code`: a collision rolls the transaction back and
/// the whole insert is retried with a fresh code, up to
/// CODE_ALLOC_RETRIES times. Concurrent creates never surface a
/// collision to the client.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    validate_question_set(&payload.questions)?;

    let creator_id = claims.user_id()?;

    for _ in 0..CODE_ALLOC_RETRIES {
        let code = gen_code();
        let mut tx = pool.begin().await?;

        let inserted: Result<i64, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO quizzes (title, description, code, creator_id, time_limit, user_limit)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&code)
        .bind(creator_id)
        .bind(payload.time_limit.unwrap_or(0))
        .bind(payload.user_limit.unwrap_or(0))
        .fetch_one(&mut *tx)
        .await;

        let quiz_id = match inserted {
            Ok(id) => id,
            // Another quiz holds this code. Roll back and redraw;
            // 36^6 codes make a second collision vanishingly rare.
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                tracing::warn!("Join code {} already taken, redrawing", code);
                continue;
            }
            Err(e) => {
                tracing::error!("Failed to create quiz: {:?}", e);
                return Err(AppError::from(e));
            }
        };

        insert_questions(&mut tx, quiz_id, &payload.questions).await?;

        tx.commit().await?;

        tracing::info!("Quiz {} created with code {}", quiz_id, code);
        return Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": quiz_id, "code": code })),
        ));
    }

    Err(AppError::InternalServerError(
        "Could not allocate a unique join code".to_string(),
    ))
}

/// Retrieves a quiz with its ordered questions.
/// The answer key is only revealed to the quiz creator.
pub async fn quiz_detail(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = quiz_by_code(&pool, &code).await?;
    let is_creator = quiz.creator_id == claims.user_id()?;
    let questions = load_questions(&pool, quiz.id, is_creator).await?;

    Ok(Json(QuizDetail { quiz, questions }))
}

/// Updates a quiz and REPLACES its entire question set.
/// Creator only. Old questions (and their options and recorded answers'
/// foreign targets) are cascade-deleted.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    validate_question_set(&payload.questions)?;

    let quiz = quiz_by_code(&pool, &code).await?;
    if quiz.creator_id != claims.user_id()? {
        return Err(AppError::Forbidden(
            "You are not allowed to edit this quiz".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE quizzes
        SET title = $1, description = $2, time_limit = $3, user_limit = $4
        WHERE id = $5
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.time_limit.unwrap_or(0))
    .bind(payload.user_limit.unwrap_or(0))
    .bind(quiz.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM questions WHERE quiz_id = $1")
        .bind(quiz.id)
        .execute(&mut *tx)
        .await?;

    insert_questions(&mut tx, quiz.id, &payload.questions).await?;

    tx.commit().await?;

    tracing::info!("Quiz {} updated", quiz.id);
    Ok(Json(serde_json::json!({ "id": quiz.id, "code": quiz.code })))
}

/// Deletes a quiz. Creator only.
/// Questions, options, attempts and answers go with it (ON DELETE CASCADE).
pub async fn delete_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = quiz_by_code(&pool, &code).await?;
    if quiz.creator_id != claims.user_id()? {
        return Err(AppError::Forbidden(
            "You are not allowed to delete this quiz".to_string(),
        ));
    }

    sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(quiz.id)
        .execute(&pool)
        .await?;

    tracing::info!("Quiz {} deleted", quiz.id);
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// Dashboard: quizzes created by the current user (with counts) and
/// the user's own attempts across other people's quizzes.
pub async fn dashboard(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let quizzes = sqlx::query_as::<_, QuizSummary>(
        r#"
        SELECT
            q.id, q.title, q.code, q.is_active, q.time_limit, q.user_limit, q.created_at,
            (SELECT COUNT(*) FROM questions WHERE quiz_id = q.id) AS question_count,
            (SELECT COUNT(*) FROM attempts WHERE quiz_id = q.id) AS attempt_count
        FROM quizzes q
        WHERE q.creator_id = $1
        ORDER BY q.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    let attempts = sqlx::query_as::<_, MyAttempt>(
        r#"
        SELECT
            a.id, q.title AS quiz_title, q.code AS quiz_code,
            a.score, a.total, a.started_at, a.finished_at
        FROM attempts a
        JOIN quizzes q ON a.quiz_id = q.id
        WHERE a.user_id = $1
        ORDER BY a.started_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(DashboardResponse { quizzes, attempts }))
}
