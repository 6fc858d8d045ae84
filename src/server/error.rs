use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{ IntoResponse, Response },
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors returned before a response stream has started. Once streaming,
/// failures travel in-band as `error` chunks instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")] InvalidBody {
        status: StatusCode,
        message: String,
    },

    #[error("{0}")] BadRequest(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("{0}")] Provider(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody { status, .. } => *status,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::Provider("down".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn renders_json_error_body() {
        let response = ApiError::BadRequest("messages must not be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "error": "messages must not be empty" }));
    }
}
