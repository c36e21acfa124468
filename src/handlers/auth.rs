// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation},
    models::user::{LoginRequest, MeResponse, RegisterRequest, User},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{Claims, sign_jwt},
    },
};

/// Registers a new user with a local password.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created and the user object (excluding the hash).
pub async fn register(
    State(pool): State<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password)
        VALUES ($1, $2, $3)
        RETURNING id, name, email, password, google_id, picture, created_at
        "#,
    )
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(&hashed_password)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Email '{}' is already registered", payload.email))
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticates a user and returns a JWT token.
///
/// Accounts created through Google sign-in have no local password and
/// cannot log in this way.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, name, email, password, google_id, picture, created_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&payload.email)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let user = user.ok_or(AppError::AuthError("Invalid email or password".to_string()))?;

    let stored_hash = user
        .password
        .as_deref()
        .ok_or(AppError::AuthError("This account uses Google sign-in".to_string()))?;

    if !verify_password(&payload.password, stored_hash)? {
        return Err(AppError::AuthError("Invalid email or password".to_string()));
    }

    let token = sign_jwt(user.id, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "user": user,
    })))
}

/// Get current user's profile and statistics.
pub async fn me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    // Subquery counts are cheap given the indexes on creator_id/user_id.
    let me = sqlx::query_as::<_, MeRow>(
        r#"
        SELECT
            u.id, u.name, u.email, u.picture, u.created_at,
            (SELECT COUNT(*) FROM quizzes WHERE creator_id = u.id) AS quizzes_count,
            (SELECT COUNT(*) FROM attempts WHERE user_id = u.id) AS attempts_count
        FROM users u
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(MeResponse {
        id: me.id,
        name: me.name,
        email: me.email,
        picture: me.picture,
        created_at: me.created_at,
        quizzes_count: me.quizzes_count,
        attempts_count: me.attempts_count,
    }))
}

#[derive(sqlx::FromRow)]
struct MeRow {
    id: i64,
    name: String,
    email: String,
    picture: Option<String>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    quizzes_count: i64,
    attempts_count: i64,
}
