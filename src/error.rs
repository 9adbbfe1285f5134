use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Treasury error: {0}")]
    Treasury(#[from] TreasuryError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("External failure: {0}")]
    ExternalFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Treasury operation errors
#[derive(Error, Debug)]
pub enum TreasuryError {
    #[error("Operation in invalid state: {current}, expected: {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Operation {0} outcome unknown: ledger submission timed out")]
    AmbiguousOutcome(Uuid),
}

/// Payment reconciliation errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Unknown payment reference: {0}")]
    UnknownReference(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::InsufficientBalance {
                required,
                available,
            } => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Insufficient balance for requested debit".to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            ),
            AppError::Treasury(TreasuryError::InvalidState { current, expected }) => (
                StatusCode::CONFLICT,
                "OPERATION_INVALID_STATE",
                format!(
                    "Operation in invalid state: {}, expected: {}",
                    current, expected
                ),
                None,
            ),
            // Never presented as success or failure: the caller must treat
            // this as pending verification until reconciled out-of-band.
            AppError::Treasury(TreasuryError::AmbiguousOutcome(id)) => (
                StatusCode::ACCEPTED,
                "PENDING_VERIFICATION",
                format!("Operation {} awaiting ledger outcome verification", id),
                Some(serde_json::json!({"operation_id": id})),
            ),
            AppError::Payment(PaymentError::UnknownReference(reference)) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_REFERENCE",
                format!("Unknown payment reference: {}", reference),
                None,
            ),
            AppError::InvalidCredential(msg) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIAL",
                format!("Invalid credential: {}", msg),
                None,
            ),
            AppError::ExternalFailure(msg) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_FAILURE",
                format!("External failure: {}", msg),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl AppError {
    /// Helper for the conditional-update precondition guards.
    pub fn invalid_state(current: impl Into<String>, expected: impl Into<String>) -> Self {
        AppError::Treasury(TreasuryError::InvalidState {
            current: current.into(),
            expected: expected.into(),
        })
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON conversion error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidRequest(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalFailure(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
