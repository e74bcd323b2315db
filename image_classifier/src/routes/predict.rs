use crate::{
    decoder::RawInput,
    inference_service::ServiceError,
    model_service::ModelLoader,
    response::{OutputPayload, ResponseBuilder},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
};
use serde::Deserialize;
use std::time::Instant;
use tracing::instrument;

const MISSING_IMAGE: &str =
    "please provide an image: upload a file in the `image` form field or send JSON {\"image\": \"<base64>\"}";

#[derive(Deserialize)]
struct ImageRequest {
    image: Option<String>,
}

/// Resolves the request body into exactly one input variant.
impl<S> FromRequest<S> for RawInput
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state).await.map_err(|e| {
                ServiceError::Validation(format!("malformed multipart body: {}", e.body_text()))
            })?;
            return image_field(multipart).await;
        }

        if is_json(&content_type) {
            let body = Bytes::from_request(req, state).await.map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ServiceError::PayloadTooLarge(e.body_text())
                } else {
                    ServiceError::Validation(format!("could not read request body: {}", e.body_text()))
                }
            })?;
            let request: ImageRequest = serde_json::from_slice(&body)
                .map_err(|e| ServiceError::Validation(format!("malformed JSON body: {}", e)))?;

            return match request.image {
                Some(image) if !image.trim().is_empty() => Ok(RawInput::Base64Payload(image)),
                _ => Err(ServiceError::Validation(
                    "please provide a base64 encoded `image` field".into(),
                )),
            };
        }

        Err(ServiceError::Validation(MISSING_IMAGE.into()))
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split_once(';')
        .map_or(content_type, |(essence, _)| essence)
        .trim();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

async fn image_field(mut multipart: Multipart) -> Result<RawInput, ServiceError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("image") {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            return Ok(RawInput::MultipartFile {
                bytes: bytes.to_vec(),
                content_type,
            });
        }
    }
    Err(ServiceError::Validation(MISSING_IMAGE.into()))
}

fn multipart_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::Validation(format!("malformed multipart body: {}", err.body_text()))
    }
}

#[instrument(skip(state, input))]
pub async fn predict<L: ModelLoader>(
    State(state): State<SharedState<L>>,
    input: Result<RawInput, ServiceError>,
) -> OutputPayload {
    state.metrics.record_request("/predict");
    let started = Instant::now();

    let result = match input {
        Ok(input) => state.inference_service.handle(input).await,
        Err(err) => Err(err),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state
        .metrics
        .record_prediction_duration(elapsed_ms, "/predict");

    match &result {
        Ok(prediction) => tracing::info!(
            class_name = %prediction.class_name,
            confidence = prediction.confidence,
            elapsed_ms,
            "Prediction completed"
        ),
        Err(err) => {
            state.metrics.record_prediction_failure(err.kind());
            if err.is_client_error() {
                tracing::warn!(stage = %err.stage(), kind = err.kind(), "Rejected request: {}", err);
            } else {
                tracing::error!(stage = %err.stage(), kind = err.kind(), "Prediction failed: {}", err);
            }
        }
    }

    ResponseBuilder::build(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_json() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/plain"));
        assert!(!is_json(""));
    }
}
