use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::ErrorResponse;
use crate::domain::error::IntegrationError;

/// ApiError は REST 層のエラー。ドメインエラーを HTTP ステータスとエラーコードへ変換する。
#[derive(Debug)]
pub struct ApiError(pub IntegrationError);

impl From<IntegrationError> for ApiError {
    fn from(e: IntegrationError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self(IntegrationError::validation(msg))
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            IntegrationError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "WL_INTEGRATION_VALIDATION_ERROR")
            }
            IntegrationError::Credential(_) => {
                (StatusCode::UNAUTHORIZED, "WL_INTEGRATION_CREDENTIAL_ERROR")
            }
            IntegrationError::NotFound(_) => (StatusCode::NOT_FOUND, "WL_INTEGRATION_NOT_FOUND"),
            IntegrationError::Conflict(_) => (StatusCode::CONFLICT, "WL_INTEGRATION_CONFLICT"),
            IntegrationError::AccountUnavailable(_) => {
                (StatusCode::CONFLICT, "WL_INTEGRATION_ACCOUNT_UNAVAILABLE")
            }
            IntegrationError::QuotaExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "WL_INTEGRATION_QUOTA_EXCEEDED")
            }
            IntegrationError::ConnectionTimeout(_) => {
                (StatusCode::GATEWAY_TIMEOUT, "WL_INTEGRATION_CONNECTION_TIMEOUT")
            }
            IntegrationError::Connector(_) => (StatusCode::BAD_GATEWAY, "WL_INTEGRATION_PROVIDER_ERROR"),
            IntegrationError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "WL_INTEGRATION_INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self.0, "request failed");
        }

        // 内部エラーの詳細はログにのみ残す
        let message = match &self.0 {
            IntegrationError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let mut body = ErrorResponse::new(code, &message);
        if let IntegrationError::QuotaExceeded { reset_at, .. } = &self.0 {
            body.error.details.push(format!("reset_at={}", reset_at.to_rfc3339()));
        }

        let mut response = (status, Json(body)).into_response();
        if let IntegrationError::QuotaExceeded { reset_at, .. } = &self.0 {
            let wait = (*reset_at - chrono::Utc::now()).num_seconds().max(0);
            if let Ok(v) = HeaderValue::from_str(&wait.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        response
    }
}
