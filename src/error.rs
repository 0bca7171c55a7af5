//! Typed errors and HTTP mapping.

use crate::response::error_body;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

/// User-facing message for failures the client cannot fix.
pub const GENERAL_ERROR: &str = "general error, please check the server log";

/// Metadata inconsistencies: either found while validating loaded metadata
/// or hit at request time when the cache lacks an expected entry.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unknown module '{0}'")]
    UnknownModule(Uuid),
    #[error("unknown relation '{0}'")]
    UnknownRelation(Uuid),
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(Uuid),
    #[error("API '{api}': join index {index} is not defined")]
    UnknownJoinIndex { api: String, index: i32 },
    #[error("API '{api}': {reason}")]
    InvalidQuery { api: String, reason: String },
    #[error("duplicate API '{0}'")]
    DuplicateApi(String),
    #[error("schema load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("too many failed attempts, origin is blocked")]
    Blocked,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {cause}")]
    Unavailable { message: String, cause: String },
    #[error("conflict: {cause}")]
    Conflict { message: String, cause: String },
}

impl AppError {
    /// Service-side failure with the generic user message; `cause` only goes to the log.
    pub fn unavailable(cause: impl ToString) -> Self {
        AppError::Unavailable {
            message: GENERAL_ERROR.into(),
            cause: cause.to_string(),
        }
    }

    /// Service-side failure whose message is safe to show to the caller.
    pub fn unavailable_with(message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Unavailable {
            cause: message.clone(),
            message,
        }
    }

    /// Write rejected by the database. The caller gets the fixed `message` of the operation,
    /// the database error in `cause` is only logged.
    pub fn conflict(message: &str, cause: impl ToString) -> Self {
        AppError::Conflict {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Blocked => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::Blocked => "blocked",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Unavailable { .. } => "unavailable",
            AppError::Conflict { .. } => "conflict",
        }
    }

    /// Message returned to the caller. Never carries SQL or driver errors.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "unauthorized".into(),
            AppError::Blocked => "blocked".into(),
            AppError::BadRequest(m) | AppError::NotFound(m) => m.clone(),
            AppError::Unavailable { message, .. } | AppError::Conflict { message, .. } => message.clone(),
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(e: SchemaError) -> Self {
        AppError::unavailable_with(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "api request aborted");
        } else {
            tracing::warn!(error = %self, "api request aborted");
        }
        let body = error_body(self.code(), self.user_message());
        (status, Json(body)).into_response()
    }
}
