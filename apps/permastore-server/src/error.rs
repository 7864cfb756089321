//! Error types for the Permastore server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::publish::PublishError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Wallet error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Multipart(e) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                format!("Failed to read upload: {}", e.body_text()),
            ),
            AppError::Identity(e) => (StatusCode::BAD_REQUEST, "invalid_wallet", e.to_string()),
            AppError::Ledger(e) => ledger_error(e),
            AppError::Publish(e) => match e {
                PublishError::Identity(e) => {
                    (StatusCode::BAD_REQUEST, "invalid_wallet", e.to_string())
                }
                PublishError::InsufficientFunds { .. } => {
                    (e.status_code(), "insufficient_funds", e.to_string())
                }
                PublishError::NoFiles => (e.status_code(), "no_files", e.to_string()),
                PublishError::Packaging(inner) if e.status_code().is_client_error() => {
                    (e.status_code(), "invalid_package", inner.to_string())
                }
                PublishError::Ledger(inner) => ledger_error(inner),
                _ if e.status_code().is_server_error()
                    && e.status_code() != StatusCode::INTERNAL_SERVER_ERROR =>
                {
                    tracing::error!("Upload failed: {}", e);
                    (e.status_code(), "upload_failed", e.to_string())
                }
                _ => {
                    tracing::error!("Publish failed: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "An internal error occurred".to_string(),
                    )
                }
            },
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}

fn ledger_error(e: &LedgerError) -> (StatusCode, &'static str, String) {
    match e {
        LedgerError::NotFound(what) => (
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Not found: {}", what),
        ),
        _ => {
            tracing::error!("Ledger error: {}", e);
            (e.status_code(), "ledger_error", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_bad_request_body() {
        let (status, body) = render(AppError::BadRequest("size must be digits".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
        assert_eq!(body["message"], "size must be digits");
    }

    #[tokio::test]
    async fn test_internal_message_is_generic() {
        let (status, body) = render(AppError::Internal("disk on fire".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let error = AppError::Publish(PublishError::InsufficientFunds {
            balance: "0".into(),
        });
        let (status, body) = render(error).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "insufficient_funds");
    }

    #[tokio::test]
    async fn test_ledger_statuses() {
        let (status, _) = render(AppError::Ledger(LedgerError::NotFound("tx".into()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = render(AppError::Ledger(LedgerError::Status {
            status: 500,
            body: "boom".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "ledger_error");
    }

    #[tokio::test]
    async fn test_wallet_errors_are_client_errors() {
        let (status, body) = render(AppError::Identity(IdentityError::Missing)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_wallet");
    }
}
