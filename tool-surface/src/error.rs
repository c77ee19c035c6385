use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::error::CoreError;
use serde::Serialize;

/// Maps every [`CoreError`] kind to the stable response shape required by
/// §6.3: a `kind` discriminator plus a human-readable message, with
/// `Internal`-class errors redacted before they reach the caller.
#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

#[cfg(test)]
impl ApiError {
    pub(crate) fn into_core(self) -> CoreError {
        self.0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match &self.0 {
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Transient(_) | CoreError::Embedding(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::PartialResult(_) => StatusCode::BAD_GATEWAY,
            CoreError::FatalConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) | CoreError::Database(_) | CoreError::Join(_) | CoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, kind, "internal error");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody { error: message, kind: kind.to_string() };
        let mut response = (status, Json(body)).into_response();
        if let CoreError::RateLimited { retry_after_secs } = self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: CoreError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(status_of(CoreError::NotFound("x".to_string())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(status_of(CoreError::Conflict("x".to_string())), StatusCode::CONFLICT);
    }

    #[test]
    fn rate_limited_maps_to_429_with_retry_after_header() {
        let response = ApiError::from(CoreError::RateLimited { retry_after_secs: 7 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(axum::http::header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn internal_errors_are_redacted() {
        let response = ApiError::from(CoreError::Internal("db password is hunter2".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
