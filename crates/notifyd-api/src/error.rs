use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use notifyd_common::NotifyError;

pub enum ApiError {
    Validation(String),
    Notify(NotifyError),
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        ApiError::Notify(err)
    }
}

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        ApiError::Validation(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, "invalid_param", message),
            ApiError::Notify(err) => {
                let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, "notify_error", err.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": { "kind": kind, "message": message } }))).into_response()
    }
}
