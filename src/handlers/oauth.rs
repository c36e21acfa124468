// src/handlers/oauth.rs

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use url::Url;

use crate::{
    config::Config,
    error::AppError,
    models::user::User,
    utils::jwt::sign_jwt,
};

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Token response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Subset of the OpenID Connect userinfo document we care about.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    name: String,
    #[serde(default)]
    picture: Option<String>,
}

fn google_settings(config: &Config) -> Result<(&str, &str, &str), AppError> {
    match (
        config.google_client_id.as_deref(),
        config.google_client_secret.as_deref(),
        config.google_redirect_url.as_deref(),
    ) {
        (Some(id), Some(secret), Some(redirect)) => Ok((id, secret, redirect)),
        _ => Err(AppError::BadRequest(
            "Google sign-in is not configured".to_string(),
        )),
    }
}

/// Builds the Google authorization URL for the frontend to redirect to.
pub fn authorize_url(client_id: &str, redirect_url: &str) -> Result<Url, AppError> {
    Url::parse_with_params(
        AUTHORIZE_ENDPOINT,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_url),
            ("response_type", "code"),
            ("scope", "openid email profile"),
        ],
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Returns the URL the client should visit to start Google sign-in.
pub async fn google_login(State(config): State<Config>) -> Result<impl IntoResponse, AppError> {
    let (client_id, _, redirect_url) = google_settings(&config)?;
    let url = authorize_url(client_id, redirect_url)?;

    Ok(Json(json!({ "authorize_url": url.as_str() })))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: String,
}

/// Handles the Google OAuth redirect: exchanges the authorization code,
/// fetches the user's profile, and signs them in.
///
/// Account resolution:
/// * a user already linked to this Google id logs straight in;
/// * an existing account with the same email gets the Google identity
///   linked to it;
/// * otherwise a new account is created (no local password).
pub async fn google_callback(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(http): State<reqwest::Client>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    let (client_id, client_secret, redirect_url) = google_settings(&config)?;

    let token: TokenResponse = http
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("code", params.code.as_str()),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_url),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?
        .error_for_status()
        .map_err(|e| {
            tracing::warn!("Google code exchange rejected: {:?}", e);
            AppError::AuthError("Google sign-in failed".to_string())
        })?
        .json()
        .await?;

    let info: GoogleUserInfo = http
        .get(USERINFO_ENDPOINT)
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| {
            tracing::warn!("Google userinfo request rejected: {:?}", e);
            AppError::AuthError("Google sign-in failed".to_string())
        })?
        .json()
        .await?;

    let user = resolve_google_user(&pool, &info).await?;

    let jwt = sign_jwt(user.id, &config.jwt_secret, config.jwt_expiration)?;

    Ok(Json(json!({
        "token": jwt,
        "type": "Bearer",
        "user": user,
    })))
}

async fn resolve_google_user(pool: &PgPool, info: &GoogleUserInfo) -> Result<User, AppError> {
    let by_google_id = sqlx::query_as::<_, User>(
        r#"
        SELECT id, name, email, password, google_id, picture, created_at
        FROM users
        WHERE google_id = $1
        "#,
    )
    .bind(&info.sub)
    .fetch_optional(pool)
    .await?;

    if let Some(user) = by_google_id {
        return Ok(user);
    }

    // Existing email account: link the Google identity to it.
    let linked = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET google_id = $1, picture = COALESCE($2, picture)
        WHERE email = $3
        RETURNING id, name, email, password, google_id, picture, created_at
        "#,
    )
    .bind(&info.sub)
    .bind(&info.picture)
    .bind(&info.email)
    .fetch_optional(pool)
    .await?;

    if let Some(user) = linked {
        tracing::info!("Linked Google account to existing user {}", user.id);
        return Ok(user);
    }

    // Brand new user, created without a local password.
    let created = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, google_id, picture)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, email, password, google_id, picture, created_at
        "#,
    )
    .bind(&info.name)
    .bind(&info.email)
    .bind(&info.sub)
    .bind(&info.picture)
    .fetch_one(pool)
    .await?;

    tracing::info!("Created user {} via Google sign-in", created.id);
    Ok(created)
}
