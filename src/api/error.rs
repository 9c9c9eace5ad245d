use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::chat::ChatError;
use crate::llm::LlmErrorKind;
use crate::selection::SelectionError;
use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned from handlers as `(status, {"error": ...})`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Store(inner) => inner.into(),
            other => Self::new(StatusCode::BAD_GATEWAY, other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match &e {
            ChatError::EmptyMessage | ChatError::InvalidAttachment(_) => StatusCode::BAD_REQUEST,
            ChatError::Selection(SelectionError::NoModelAvailable { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ChatError::Selection(SelectionError::Store(_)) | ChatError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::Llm(err) => match err.kind {
                LlmErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                LlmErrorKind::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
                LlmErrorKind::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                LlmErrorKind::Upstream
                | LlmErrorKind::Rejected
                | LlmErrorKind::Network
                | LlmErrorKind::Malformed => StatusCode::BAD_GATEWAY,
            },
        };
        Self::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_chat_error_status_mapping() {
        let cases = [
            (ChatError::EmptyMessage, StatusCode::BAD_REQUEST),
            (
                ChatError::Selection(SelectionError::NoModelAvailable {
                    requested: "x".to_string(),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ChatError::Llm(LlmError::from_status(429, "slow down", None)),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ChatError::Llm(LlmError::from_status(402, "credits", None)),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ChatError::Llm(LlmError::from_status(404, "No endpoints found", None)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ChatError::Llm(LlmError::from_status(503, "down", None)),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ChatError::Llm(LlmError::from_status(401, "bad key", None)),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
