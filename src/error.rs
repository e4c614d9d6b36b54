use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller is not the customer or driver the order belongs to.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The order or driver is no longer in a state that allows the change.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => msg,
            AppError::Config(_) => "service misconfigured".to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::AppError;

    #[test]
    fn ownership_errors_map_to_forbidden() {
        let response = AppError::Forbidden("not yours".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn state_errors_map_to_conflict() {
        assert_eq!(
            AppError::Conflict("taken".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Config("bad port".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
