// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    pub name: String,

    /// Unique email address, used as the login identifier.
    pub email: String,

    /// Argon2 password hash. NULL for Google-only accounts.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: Option<String>,

    /// Google subject claim ('sub') when the account is linked to Google.
    #[serde(skip)]
    pub google_id: Option<String>,

    /// Avatar URL from the Google profile, if any.
    pub picture: Option<String>,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Aggregated profile data for the current user.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub quizzes_count: i64,
    pub attempts_count: i64,
}

/// DTO for creating a new user (Registration).
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Name length must be between 2 and 100 characters."
    ))]
    pub name: String,
    #[validate(email(message = "Invalid email address."))]
    pub email: String,
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}
