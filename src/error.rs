use crate::auth::AuthError;
use crate::db::StoreError;
use crate::ledger::LedgerError;
use crate::orchestration::{IngestError, MatchError, PostingError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Every failure the HTTP surface reports, rendered as `{ ok: false, error, details? }`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A business rule refused the operation; `details` says which.
    #[error("{message}")]
    Unprocessable {
        message: String,
        details: Option<Value>,
    },
    /// Ledger or persistence collaborator failure, message preserved.
    #[error("Upstream failure: {0}")]
    Upstream(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::Forbidden { .. } => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Corrupt(msg) => AppError::Internal(msg),
            StoreError::Db(e) => AppError::Upstream(e.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::Rejected(reason) => AppError::Unprocessable {
                message: err.to_string(),
                details: Some(json!({ "ledger": "rejected", "reason": reason })),
            },
            LedgerError::Unbalanced { debit, credit } => AppError::Unprocessable {
                message: err.to_string(),
                details: Some(json!({ "ledger": "unbalanced", "debit": debit, "credit": credit })),
            },
            LedgerError::Unavailable(msg) => AppError::Upstream(msg.clone()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(msg) => AppError::BadRequest(msg),
            IngestError::EventNotFound(_) => AppError::NotFound(err.to_string()),
            IngestError::Store(e) => e.into(),
        }
    }
}

impl From<PostingError> for AppError {
    fn from(err: PostingError) -> Self {
        match err {
            PostingError::Validation(msg) => AppError::BadRequest(msg),
            PostingError::Auth(e) => e.into(),
            PostingError::NotFound(_) => AppError::NotFound(err.to_string()),
            PostingError::InProgress(_)
            | PostingError::InvalidState { .. }
            | PostingError::Void(_) => AppError::Conflict(err.to_string()),
            PostingError::MissingAccountMapping { batch_id, ref roles } => {
                AppError::Unprocessable {
                    message: err.to_string(),
                    details: Some(json!({
                        "batchId": batch_id,
                        "postingState": "missing",
                        "unmappedRoles": roles,
                    })),
                }
            }
            PostingError::Ledger(e) => e.into(),
            PostingError::Store(e) => e.into(),
        }
    }
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Validation(msg) => AppError::BadRequest(msg),
            MatchError::Auth(e) => e.into(),
            MatchError::NotFound(msg) => AppError::NotFound(msg),
            MatchError::Conflict(msg) => AppError::Conflict(msg),
            MatchError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let (error_message, details) = match self {
            AppError::Unprocessable { message, details } => (message, details),
            other => (other.to_string(), None),
        };

        let mut body = json!({
            "ok": false,
            "error": error_message,
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}
