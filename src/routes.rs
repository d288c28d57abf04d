// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    handlers::{attempt, health, quiz},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Merges the quiz and attempt sub-routers, both behind authentication.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (store, attempt service, config).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let quiz_routes = Router::new()
        .route("/", post(quiz::create_quiz))
        .route("/{id}", get(quiz::get_quiz).delete(quiz::delete_quiz))
        .route("/{id}/attempts", post(quiz::start_attempt))
        .route("/{id}/submissions", get(quiz::list_submissions));

    let attempt_routes = Router::new()
        .route("/", get(attempt::list_my_attempts))
        .route("/{id}", get(attempt::get_attempt))
        .route("/{id}/answers", put(attempt::save_answer))
        .route("/{id}/submit", post(attempt::submit_attempt));

    let api_routes = Router::new()
        .nest("/quizzes", quiz_routes)
        .nest("/attempts", attempt_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", api_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
