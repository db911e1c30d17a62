//! HTTP error mapping.
//!
//! Every handler returns `Result<_, ApiError>`. Governance errors keep their
//! stable code in the body so clients can branch on it without parsing the
//! message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use tontine_protocol::governance::{ErrorKind, GovernanceError};

/// Central error type for the API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A blocking engine task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Governance(err) => match err.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::InvalidAmount | ErrorKind::InvalidRequest => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ErrorKind::VaultClosed
                | ErrorKind::AlreadyProcessed
                | ErrorKind::DuplicateVote
                | ErrorKind::InsufficientFunds => StatusCode::CONFLICT,
                ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Governance(err) => err.kind().as_str(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Storage details stay in the log.
            ApiError::Governance(GovernanceError::Storage(e)) => {
                tracing::error!(error = %e, "storage failure");
                "internal storage error".to_string()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message
        }));

        (status, body).into_response()
    }
}
