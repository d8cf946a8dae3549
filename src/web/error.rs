// Error types for the HTTP boundary

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::models::ErrorResponse;
use crate::engine::EngineError;

/// API server error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    ImageDecodeError(String),
    UnsupportedMediaType(String),
    SegmentationFailed,
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::ImageDecodeError(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            // The model failure detail stays in the server logs.
            Self::SegmentationFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Background removal failed".to_string(),
            ),
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::ModelUnavailable(_)
            | EngineError::SessionInit(_)
            | EngineError::Inference(_) => Self::SegmentationFailed,
            EngineError::WorkerUnavailable => {
                Self::ServiceUnavailable("Segmentation worker is not available".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("parse json")
    }

    #[tokio::test]
    async fn bad_request_renders_the_fixed_error_shape() {
        let response = ApiError::BadRequest("No file uploaded".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "error": "No file uploaded" }));
    }

    #[tokio::test]
    async fn inference_errors_do_not_leak_detail() {
        let engine_error = EngineError::Inference("tensor shape mismatch in layer 3".to_string());
        let response = ApiError::from(engine_error).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Background removal failed");
    }

    #[tokio::test]
    async fn worker_loss_maps_to_service_unavailable() {
        let response = ApiError::from(EngineError::WorkerUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
