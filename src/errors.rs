use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WarrantyError {
    #[error("Serialization error: {0}")]
    #[diagnostic(code(pump_warranty::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(pump_warranty::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("{0}")]
    #[diagnostic(
        code(pump_warranty::validation),
        help("Supply the missing field and resend the request")
    )]
    Validation(String),

    #[error("{0}")]
    #[diagnostic(
        code(pump_warranty::unauthorized),
        help("Log in again to obtain a fresh session token")
    )]
    Unauthorized(String),

    #[error("{0}")]
    #[diagnostic(code(pump_warranty::forbidden))]
    Forbidden(String),

    #[error("Invalid or expired code")]
    #[diagnostic(
        code(pump_warranty::invalid_code),
        help("Check the code that was sent to the phone, or request a new one")
    )]
    InvalidCode,

    #[error("{0}")]
    #[diagnostic(code(pump_warranty::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(pump_warranty::conflict))]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(code(pump_warranty::other))]
    Other(String),
}

impl WarrantyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WarrantyError::Validation(msg.into())
    }

    /// Stable machine-readable kind used as the `error` field of HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            WarrantyError::Validation(_) => "invalid_request",
            WarrantyError::InvalidCode => "invalid_or_expired_code",
            WarrantyError::Unauthorized(_) => "unauthorized",
            WarrantyError::Forbidden(_) => "forbidden",
            WarrantyError::NotFound(_) => "not_found",
            WarrantyError::Conflict(_) => "conflict",
            _ => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WarrantyError::Validation(_) | WarrantyError::InvalidCode => StatusCode::BAD_REQUEST,
            WarrantyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WarrantyError::Forbidden(_) => StatusCode::FORBIDDEN,
            WarrantyError::NotFound(_) => StatusCode::NOT_FOUND,
            WarrantyError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for WarrantyError {
    fn from(rejection: JsonRejection) -> Self {
        WarrantyError::Validation(rejection.body_text())
    }
}

impl IntoResponse for WarrantyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({ "error": self.kind(), "error_description": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_4xx() {
        assert_eq!(
            WarrantyError::validation("serial is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(WarrantyError::InvalidCode.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            WarrantyError::Unauthorized("no session".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WarrantyError::Forbidden("admin only".into()).status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_code_errors_are_distinct_from_validation() {
        assert_ne!(
            WarrantyError::InvalidCode.kind(),
            WarrantyError::validation("code is required").kind()
        );
    }

    #[test]
    fn test_storage_errors_are_internal() {
        let err = WarrantyError::Other("boom".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "internal_error");
    }
}
