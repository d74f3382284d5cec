use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdf_chat_core::{ServiceError, StorageError};
use serde_json::json;
use tracing::{error, warn};

/// Failure of a single HTTP request.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self::Service(error)
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        Self::Service(ServiceError::Storage(error))
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String, bool) {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "invalid_request", message.clone(), false),
            Self::Service(error) => {
                let message = error.to_string();
                match error {
                    ServiceError::InvalidInput(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_request", message, false)
                    }
                    ServiceError::Timeout { .. } | ServiceError::Unreachable { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", message, true)
                    }
                    // 429 and 5xx from the model API are worth retrying; other refusals are not.
                    ServiceError::Rejected { .. } if error.is_transient() => {
                        (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", message, true)
                    }
                    ServiceError::Rejected { .. } => {
                        (StatusCode::BAD_GATEWAY, "upstream_error", message, false)
                    }
                    ServiceError::BadResponse { .. } => {
                        (StatusCode::BAD_GATEWAY, "upstream_error", message, false)
                    }
                    ServiceError::Config(_) | ServiceError::Storage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message, false)
                    }
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, retryable) = self.parts();

        if status.is_server_error() {
            error!(status = status.as_u16(), error_type, %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error_type, %message, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "retryable": retryable,
            }
        }));

        (status, body).into_response()
    }
}
