use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("sandbox provisioning failed: {0}")]
    Provision(String),
    #[error("render queue is full")]
    QueueFull,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl StudioError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence_error",
            Self::Provision(_) => "provision_error",
            Self::QueueFull => "queue_full",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provision(_) => StatusCode::BAD_GATEWAY,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Persistence(format!("{context}: {err}"))
    }
}

impl IntoResponse for StudioError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            success: false,
            error: self.code(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for StudioError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
