use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure of a relay REST endpoint, rendered as
/// `{ "error": { "code", "message", "status" } }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Room '{0}' does not exist.")]
    RoomNotFound(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RoomNotFound(_) => "room_not_found",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(code = self.code(), status = status.as_u16(), "{message}");
        } else {
            tracing::warn!(code = self.code(), status = status.as_u16(), "{message}");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "status": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}
