use crate::auth::AuthError;
use crate::enrichment::EnrichmentError;
use crate::models::FieldError;
use crate::video_store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Failures surfaced by the HTTP API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Enrichment(EnrichmentError::TimedOut(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "ENRICHMENT_TIMEOUT")
            }
            Self::Enrichment(_) => (StatusCode::SERVICE_UNAVAILABLE, "ENRICHMENT_UNAVAILABLE"),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (message, details) = match self {
            Self::Validation(fields) => ("Invalid request body".to_string(), Some(fields)),
            Self::Auth(e) => {
                warn!(error = %e, "Rejected unauthenticated request");
                (e.client_message().to_string(), None)
            }
            Self::Enrichment(EnrichmentError::Unavailable) => {
                warn!("Owner enrichment unavailable, circuit open");
                ("Owner information temporarily unavailable".to_string(), None)
            }
            Self::Enrichment(EnrichmentError::TimedOut(after)) => {
                warn!(timeout_ms = after.as_millis() as u64, "Owner enrichment timed out");
                ("Timed out resolving owner information".to_string(), None)
            }
            Self::Enrichment(e) => {
                error!(error = %e, "Owner enrichment failed");
                ("Owner information temporarily unavailable".to_string(), None)
            }
            Self::Store(e) => {
                error!(error = %e, "Video store failure");
                ("Internal server error".to_string(), None)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Validation(Vec::new()), StatusCode::BAD_REQUEST),
            (ApiError::Auth(AuthError::NotReady), StatusCode::UNAUTHORIZED),
            (
                ApiError::Enrichment(EnrichmentError::Unavailable),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Enrichment(EnrichmentError::TimedOut(Duration::from_secs(3))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ApiError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_store_errors_do_not_leak_cause() {
        let error = ApiError::Store(StoreError::Database(sqlx::Error::Protocol(
            "relation \"videos\" does not exist".to_string(),
        )));

        let body = axum::body::to_bytes(error.into_response().into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(body["code"], "STORE_ERROR");
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("details").is_none());
    }
}
