// src/handlers/attempt.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    error::{AppError, is_unique_violation},
    handlers::quiz::{load_questions, quiz_by_code},
    models::{
        attempt::{Attempt, JoinRequest, SubmitRequest, SubmitResult},
        quiz::{Quiz, QuizDetail},
    },
    utils::jwt::Claims,
};

/// Grace window added to the time limit before a submission is voided.
const GRACE_SECONDS: f64 = 30.0;

/// Answer key row: option id -> owning question and correctness.
#[derive(sqlx::FromRow)]
struct OptionKey {
    id: i64,
    question_id: i64,
    is_correct: bool,
}

/// One graded answer, ready to be persisted.
#[derive(Debug, PartialEq)]
struct GradedAnswer {
    question_id: i64,
    selected_id: Option<i64>,
    is_correct: bool,
}

/// Single pass over the quiz's questions. A selection counts iff the
/// option exists, belongs to that question, and is marked correct.
/// Every question yields one graded answer, answered or not.
fn grade_answers(
    question_ids: &[i64],
    selections: &HashMap<i64, i64>,
    answer_key: &HashMap<i64, OptionKey>,
) -> (i32, Vec<GradedAnswer>) {
    let mut score = 0;
    let mut graded = Vec::with_capacity(question_ids.len());

    for &question_id in question_ids {
        let selected_id = selections.get(&question_id).copied();
        let is_correct = selected_id
            .and_then(|id| answer_key.get(&id))
            .map(|opt| opt.question_id == question_id && opt.is_correct)
            .unwrap_or(false);

        if is_correct {
            score += 1;
        }
        graded.push(GradedAnswer {
            question_id,
            selected_id,
            is_correct,
        });
    }

    (score, graded)
}

/// Checks whether a user may take the quiz right now.
/// Mirrors the gates on the take page: active flag, no prior attempt,
/// participant cap.
async fn check_eligibility(pool: &PgPool, quiz: &Quiz, user_id: i64) -> Result<(), AppError> {
    if !quiz.is_active {
        return Err(AppError::BadRequest(
            "This quiz is no longer active".to_string(),
        ));
    }

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM attempts WHERE quiz_id = $1 AND user_id = $2")
            .bind(quiz.id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "You have already attempted this quiz".to_string(),
        ));
    }

    if quiz.user_limit > 0 {
        let attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE quiz_id = $1")
            .bind(quiz.id)
            .fetch_one(pool)
            .await?;
        if attempts >= quiz.user_limit as i64 {
            return Err(AppError::BadRequest(
                "This quiz has reached its maximum number of participants".to_string(),
            ));
        }
    }

    Ok(())
}

/// Resolves a join code to a quiz summary.
/// The code is trimmed and uppercased before lookup, so codes typed by
/// hand in any case still match.
pub async fn join_quiz(
    State(pool): State<PgPool>,
    Extension(_claims): Extension<Claims>,
    Json(payload): Json<JoinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = payload.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("Please enter a quiz code".to_string()));
    }

    let quiz = match quiz_by_code(&pool, &code).await {
        Ok(quiz) => quiz,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::NotFound("Invalid quiz code".to_string()));
        }
        Err(e) => return Err(e),
    };

    Ok(Json(quiz))
}

/// Eligibility gate plus the questions (without the answer key).
pub async fn take_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let quiz = quiz_by_code(&pool, &code).await?;
    check_eligibility(&pool, &quiz, user_id).await?;

    let questions = load_questions(&pool, quiz.id, false).await?;
    Ok(Json(QuizDetail { quiz, questions }))
}

/// Starts an attempt: re-checks the gates, then records the attempt
/// with `total` = question count and `started_at` = now.
///
/// The UNIQUE (quiz_id, user_id) constraint backstops two concurrent
/// starts slipping past the existence check.
pub async fn start_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let quiz = quiz_by_code(&pool, &code).await?;
    check_eligibility(&pool, &quiz, user_id).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE quiz_id = $1")
        .bind(quiz.id)
        .fetch_one(&pool)
        .await?;

    let attempt_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO attempts (quiz_id, user_id, total)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(quiz.id)
    .bind(user_id)
    .bind(total as i32)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("You have already attempted this quiz".to_string())
        } else {
            tracing::error!("Failed to start attempt: {:?}", e);
            AppError::from(e)
        }
    })?;

    tracing::info!("User {} started attempt {} on quiz {}", user_id, attempt_id, quiz.id);
    Ok(Json(serde_json::json!({ "status": "ok", "attempt_id": attempt_id })))
}

/// Grades and finalizes the caller's open attempt.
///
/// * Requires an unfinished attempt on this quiz.
/// * A submission past time_limit + 30s grace DELETES the attempt and
///   is rejected; nothing is recorded for that user.
/// * Otherwise one Answer row is stored per question, the attempt is
///   closed, and the rank among all attempts is computed.
pub async fn submit_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(code): Path<String>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let quiz = quiz_by_code(&pool, &code).await?;

    let attempt = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT id, quiz_id, user_id, score, total, started_at, finished_at
        FROM attempts
        WHERE quiz_id = $1 AND user_id = $2 AND finished_at IS NULL
        "#,
    )
    .bind(quiz.id)
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::BadRequest(
        "Invalid attempt or already submitted".to_string(),
    ))?;

    if quiz.time_limit > 0 {
        let elapsed = (Utc::now() - attempt.started_at).num_seconds() as f64;
        let allowed = quiz.time_limit as f64 * 60.0 + GRACE_SECONDS;
        if elapsed > allowed {
            sqlx::query("DELETE FROM attempts WHERE id = $1")
                .bind(attempt.id)
                .execute(&pool)
                .await?;
            tracing::info!(
                "Attempt {} voided: {:.0}s elapsed against {:.0}s allowed",
                attempt.id,
                elapsed,
                allowed
            );
            return Err(AppError::BadRequest(
                "Time expired! Your attempt was not recorded".to_string(),
            ));
        }
    }

    let question_ids: Vec<i64> = sqlx::query_scalar(
        r#"SELECT id FROM questions WHERE quiz_id = $1 ORDER BY "position""#,
    )
    .bind(quiz.id)
    .fetch_all(&pool)
    .await?;

    let options = sqlx::query_as::<_, OptionKey>(
        r#"
        SELECT o.id, o.question_id, o.is_correct
        FROM options o
        JOIN questions q ON o.question_id = q.id
        WHERE q.quiz_id = $1
        "#,
    )
    .bind(quiz.id)
    .fetch_all(&pool)
    .await?;
    let answer_key: HashMap<i64, OptionKey> = options.into_iter().map(|o| (o.id, o)).collect();

    let (score, graded) = grade_answers(&question_ids, &payload.answers, &answer_key);

    let mut tx = pool.begin().await?;

    for answer in &graded {
        sqlx::query(
            r#"
            INSERT INTO answers (attempt_id, question_id, selected_id, is_correct)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(attempt.id)
        .bind(answer.question_id)
        .bind(answer.selected_id)
        .bind(answer.is_correct)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE attempts SET score = $1, finished_at = $2 WHERE id = $3")
        .bind(score)
        .bind(Utc::now())
        .bind(attempt.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    // Rank: 1 + attempts that beat this score. Ties share a rank.
    let rank: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) + 1 FROM attempts WHERE quiz_id = $1 AND score > $2",
    )
    .bind(quiz.id)
    .bind(score)
    .fetch_one(&pool)
    .await?;

    let total_attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE quiz_id = $1")
        .bind(quiz.id)
        .fetch_one(&pool)
        .await?;

    tracing::info!(
        "Attempt {} submitted: score {}/{} rank {}/{}",
        attempt.id,
        score,
        attempt.total,
        rank,
        total_attempts
    );

    Ok(Json(SubmitResult {
        score,
        total: attempt.total,
        rank,
        total_attempts,
    }))
}
