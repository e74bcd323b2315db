use crate::inference_service::{InferenceResult, ServiceError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// What a prediction request answers with: the label and score, or an error and its status.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPayload {
    Prediction(InferenceResult),
    Error {
        status: StatusCode,
        body: ErrorPayload,
    },
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn build(result: Result<InferenceResult, ServiceError>) -> OutputPayload {
        match result {
            Ok(prediction) => OutputPayload::Prediction(prediction),
            Err(err) => OutputPayload::Error {
                status: status_code(&err),
                body: ErrorPayload {
                    error: client_message(&err),
                },
            },
        }
    }
}

pub fn status_code(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
        ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        ServiceError::Load(_) | ServiceError::Inference(_) | ServiceError::Timeout(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Client-facing text. Model load details (paths, runtime messages) stay in the logs.
fn client_message(err: &ServiceError) -> String {
    match err {
        ServiceError::Load(_) => {
            "model unavailable: the classifier could not be loaded".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for OutputPayload {
    fn into_response(self) -> Response {
        match self {
            OutputPayload::Prediction(prediction) => Json(prediction).into_response(),
            OutputPayload::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        ResponseBuilder::build(Err(self)).into_response()
    }
}
