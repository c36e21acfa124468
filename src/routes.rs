// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, auth, oauth, quiz},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, quizzes, dashboard).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, HTTP client).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/google", get(oauth::google_login))
        .route("/google/callback", get(oauth::google_callback))
        // Protected profile route
        .merge(
            Router::new().route("/me", get(auth::me)).layer(
                middleware::from_fn_with_state(state.clone(), auth_middleware),
            ),
        );

    let quiz_routes = Router::new()
        .route("/", post(quiz::create_quiz))
        .route("/join", post(attempt::join_quiz))
        .route(
            "/{code}",
            get(quiz::quiz_detail)
                .put(quiz::update_quiz)
                .delete(quiz::delete_quiz),
        )
        .route("/{code}/take", get(attempt::take_quiz))
        .route("/{code}/start", post(attempt::start_quiz))
        .route("/{code}/submit", post(attempt::submit_quiz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let dashboard_routes = Router::new()
        .route("/", get(quiz::dashboard))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/dashboard", dashboard_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
