//! HTTP rendering of [`common::Error`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use common::Error;
use tracing::error;

/// Error returned by every HTTP handler and middleware.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.kind(), "Request failed");
        }

        let body = self.0.to_body(now_rfc3339());
        (status, Json(body)).into_response()
    }
}

/// Current time as RFC 3339 with millisecond precision
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use common::ErrorBody;

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = ApiError(Error::not_registered("posts")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status_code, 404);
        assert_eq!(body.error, "NotRegistered");
        assert_eq!(body.message, "Service posts is not registered or unavailable");
        assert!(body.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_upstream_status_passthrough() {
        let response = ApiError(Error::upstream(502, "Service error")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
