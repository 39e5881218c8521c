use crate::api::SpotifyError;
use axum::http::header::{LOCATION, RETRY_AFTER};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug)]
pub enum AppError {
    Upstream(SpotifyError),
    Database(anyhow::Error),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<SpotifyError> for AppError {
    fn from(e: SpotifyError) -> Self {
        AppError::Upstream(e)
    }
}

/// 302 Found to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Upstream(e) if e.needs_login() => found("/login"),
            AppError::Upstream(SpotifyError::RateLimited { retry_after }) => {
                warn!("upstream rate limit reached");
                let mut resp = json_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limited by the upstream API; try again later".into(),
                );
                if let Some(secs) = retry_after {
                    resp.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
                }
                resp
            }
            AppError::Upstream(SpotifyError::Status { status: 404, body }) => {
                json_error(StatusCode::NOT_FOUND, format!("Not found upstream: {}", body))
            }
            AppError::Upstream(SpotifyError::Store(msg)) => {
                error!("token store error: {}", msg);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", msg))
            }
            AppError::Upstream(e) => {
                error!("upstream error: {}", e);
                json_error(StatusCode::BAD_GATEWAY, format!("Upstream error: {}", e))
            }
            AppError::Database(e) => {
                error!("database error: {:#}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
            }
            AppError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => json_error(StatusCode::CONFLICT, msg),
            AppError::Internal(e) => {
                error!("internal error: {:#}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_bounces_to_login() {
        let resp = AppError::from(SpotifyError::NotAuthenticated).into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[LOCATION], "/login");
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let resp = AppError::from(SpotifyError::RateLimited { retry_after: Some(7) }).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[RETRY_AFTER], "7");
    }

    #[test]
    fn database_errors_are_500() {
        let resp = AppError::Database(anyhow::anyhow!("disk I/O error")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
