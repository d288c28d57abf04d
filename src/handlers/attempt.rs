// src/handlers/attempt.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::attempt::{QuizAggregates, SaveAnswerRequest, SubmitResponse},
    services::AttemptService,
    utils::jwt::Claims,
};

/// Lists the caller's attempts, newest first.
pub async fn list_my_attempts(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    Ok(Json(attempts.list_for_user(user_id).await?))
}

/// Returns one attempt to its participant or to the quiz owner.
pub async fn get_attempt(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requester_id = claims.user_id()?;
    Ok(Json(attempts.get(id, requester_id).await?))
}

/// Saves one answer. An empty `selected_answer` clears the question.
pub async fn save_answer(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requester_id = claims.user_id()?;
    if req.question_id.is_empty() {
        return Err(AppError::BadRequest("question_id must not be empty".to_string()));
    }

    let attempt = attempts
        .save_answer(id, requester_id, &req.question_id, &req.selected_answer)
        .await?;
    Ok(Json(attempt))
}

/// Submits the attempt. 409 if it was already finalized.
pub async fn submit_attempt(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requester_id = claims.user_id()?;
    let (attempt, quiz) = attempts.submit(id, requester_id).await?;

    Ok(Json(SubmitResponse {
        attempt,
        quiz: QuizAggregates::from(&quiz),
    }))
}
