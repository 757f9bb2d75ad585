use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use santa_core::{draw_failure_message, DrawError, GroupError, JoinError, StoreError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }

    fn into_message(self) -> String {
        match self {
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.parts();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }
        let body = Json(ErrorResponse {
            error,
            message: self.into_message(),
        });
        (status, body).into_response()
    }
}

impl From<DrawError> for ApiError {
    fn from(err: DrawError) -> Self {
        let message = draw_failure_message(&err);
        match err {
            DrawError::InsufficientParticipants { .. } => ApiError::BadRequest(message),
            DrawError::DrawExhausted { .. } => ApiError::Unavailable(message),
            DrawError::ConcurrentDrawConflict | DrawError::AlreadyDrawn => {
                ApiError::Conflict(message)
            }
            DrawError::GroupNotFound => ApiError::NotFound(message),
            DrawError::NotOwner => ApiError::Forbidden(message),
            DrawError::Store(_) => ApiError::Internal(message),
        }
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        let message = err.to_string();
        match err {
            JoinError::GroupNotFound => ApiError::NotFound(message),
            JoinError::WrongPassword => ApiError::Unauthorized(message),
            JoinError::DuplicateEmail | JoinError::DrawClosed => ApiError::Conflict(message),
            JoinError::InvalidName | JoinError::InvalidEmail => ApiError::BadRequest(message),
        }
    }
}

impl From<GroupError> for ApiError {
    fn from(err: GroupError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::GroupNotFound => ApiError::NotFound(err.to_string()),
            StoreError::DrawAlreadySet | StoreError::ParticipantsChanged => {
                ApiError::from(DrawError::ConcurrentDrawConflict)
            }
            StoreError::DuplicateGroup(_) | StoreError::DuplicateInviteCode(_) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}
