//! JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fieldvault_core::broker::BrokerError;
use fieldvault_core::record::RecordError;
use fieldvault_shared::AppError;
use serde_json::json;
use tracing::{error, warn};

/// Handler error rendered as `{status: "error", message, code}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = %self.0, code = self.0.error_code(), "Request failed");
        } else {
            warn!(error = %self.0, code = self.0.error_code(), "Request rejected");
        }

        let mut body = json!({
            "status": "error",
            "message": self.0.to_string(),
            "code": self.0.error_code(),
        });
        if self.0.is_retryable() {
            body["retryable"] = json!(true);
        }

        (status, Json(body)).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err.into())
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        Self(err.into())
    }
}
