// src/handlers/quiz.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::quiz::{CreateQuizRequest, PublicQuiz},
    services::{AttemptService, StartOutcome},
    store::{QuizStore, Store},
    utils::jwt::Claims,
};

/// Creates a quiz owned by the caller.
pub async fn create_quiz(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = claims.user_id()?;
    payload.check().map_err(AppError::BadRequest)?;

    let quiz = payload.into_quiz(owner_id);
    store.insert_quiz(&quiz).await?;
    tracing::info!(quiz_id = %quiz.id, owner_id, "Quiz created");

    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Returns a quiz. Only the owner sees the correct answers and aggregates.
pub async fn get_quiz(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let requester_id = claims.user_id()?;
    let quiz = store
        .find_quiz(id)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    if quiz.owner_id == requester_id {
        Ok(Json(quiz).into_response())
    } else {
        Ok(Json(PublicQuiz::from(&quiz)).into_response())
    }
}

/// Deletes a quiz. Owner only.
/// Attempts that reference it can no longer be finalized.
pub async fn delete_quiz(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requester_id = claims.user_id()?;
    let quiz = store
        .find_quiz(id)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    if quiz.owner_id != requester_id {
        return Err(AppError::Forbidden("Only the quiz owner can delete it".to_string()));
    }

    store.delete_quiz(id).await?;
    tracing::warn!(quiz_id = %id, "Quiz deleted; open attempts on it are now dangling");

    Ok(StatusCode::NO_CONTENT)
}

/// Starts an attempt on the quiz, or resumes the caller's open one.
/// 201 for a new attempt, 200 for a resumed one.
pub async fn start_attempt(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let response = match attempts.start(user_id, quiz_id).await? {
        StartOutcome::Created(attempt) => (StatusCode::CREATED, Json(attempt)),
        StartOutcome::Resumed(attempt) => (StatusCode::OK, Json(attempt)),
    };
    Ok(response)
}

/// Lists the submitted attempts of a quiz. Owner only.
pub async fn list_submissions(
    State(attempts): State<Arc<AttemptService>>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requester_id = claims.user_id()?;
    let submissions = attempts.list_submissions(quiz_id, requester_id).await?;
    Ok(Json(submissions))
}
