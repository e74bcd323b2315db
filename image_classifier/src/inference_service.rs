use crate::{
    decoder::{DecodeError, ImageDecoder, RawInput},
    model_handle::{ModelError, ModelHandle},
    model_service::{InferenceError, LoadError, ModelLoader},
    preprocess::Preprocessor,
    state::ClassLabels,
};
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// Pipeline position of a request. A [`ServiceError`] records the stage it failed in.
/// `Preprocessing` cannot fail and `Completed` is terminal, so errors never report either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoding,
    Preprocessing,
    Inferring,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoding => "decoding",
            Stage::Preprocessing => "preprocessing",
            Stage::Inferring => "inferring",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Decode(DecodeError),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("model unavailable: {0}")]
    Load(#[from] LoadError),
    #[error("prediction failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    /// The stage the request was in when it failed.
    pub fn stage(&self) -> Stage {
        match self {
            ServiceError::Validation(_) | ServiceError::PayloadTooLarge(_) => Stage::Received,
            ServiceError::Decode(_) => Stage::Decoding,
            ServiceError::Load(_) | ServiceError::Inference(_) | ServiceError::Timeout(_) => {
                Stage::Inferring
            }
        }
    }

    /// Stable class name, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Decode(_) => "decode",
            ServiceError::PayloadTooLarge(_) => "payload_too_large",
            ServiceError::Load(_) => "load",
            ServiceError::Inference(_) => "inference",
            ServiceError::Timeout(_) => "timeout",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_) | ServiceError::Decode(_) | ServiceError::PayloadTooLarge(_)
        )
    }
}

impl From<DecodeError> for ServiceError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::TooLarge { .. } => ServiceError::PayloadTooLarge(err.to_string()),
            other => ServiceError::Decode(other),
        }
    }
}

impl From<ModelError> for ServiceError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Load(e) => ServiceError::Load(e),
            ModelError::Inference(e) => ServiceError::Inference(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
    pub class_name: String,
    pub confidence: f32,
}

/// Decode, preprocess, infer and label one image.
pub struct InferenceService<L: ModelLoader> {
    decoder: ImageDecoder,
    preprocessor: Preprocessor,
    model: Arc<ModelHandle<L>>,
    labels: Arc<ClassLabels>,
    timeout: Duration,
}

impl<L: ModelLoader> Clone for InferenceService<L> {
    fn clone(&self) -> Self {
        Self {
            decoder: self.decoder.clone(),
            preprocessor: self.preprocessor,
            model: self.model.clone(),
            labels: self.labels.clone(),
            timeout: self.timeout,
        }
    }
}

impl<L: ModelLoader> InferenceService<L> {
    pub fn new(
        decoder: ImageDecoder,
        preprocessor: Preprocessor,
        model: ModelHandle<L>,
        labels: ClassLabels,
        timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            preprocessor,
            model: Arc::new(model),
            labels: Arc::new(labels),
            timeout,
        }
    }

    pub fn model(&self) -> &Arc<ModelHandle<L>> {
        &self.model
    }

    /// Materializes the model ahead of the first request. Load failures are logged by the
    /// handle and reported again to every prediction.
    pub async fn warm_up(&self) {
        let model = self.model.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || model.get().map(|_| ())).await {
            tracing::error!("Model warm-up task failed: {}", e);
        }
    }

    /// Runs the pipeline on the blocking pool, bounded by the request timeout.
    ///
    /// A timed-out request stops waiting but the blocking work, including a model load in
    /// progress, runs to completion so other requests can use its result.
    pub async fn handle(&self, input: RawInput) -> Result<InferenceResult, ServiceError> {
        let service = self.clone();
        let task = tokio::task::spawn_blocking(move || service.run_pipeline(input));

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(ServiceError::Timeout(self.timeout)),
            Ok(Err(join_error)) => {
                tracing::error!("Prediction task failed: {}", join_error);
                Err(ServiceError::Inference(InferenceError::Runtime(
                    "prediction worker crashed".into(),
                )))
            }
            Ok(Ok(result)) => result,
        }
    }

    /// The synchronous pipeline. Stages run in order and the first failure ends the request.
    pub fn run_pipeline(&self, input: RawInput) -> Result<InferenceResult, ServiceError> {
        tracing::debug!(stage = %Stage::Received, "{:?}", input);

        tracing::debug!(stage = %Stage::Decoding);
        let image = self.decoder.decode(input)?;

        tracing::debug!(stage = %Stage::Preprocessing);
        let tensor = self.preprocessor.prepare(&image);
        drop(image);

        tracing::debug!(stage = %Stage::Inferring);
        let probabilities = self.model.infer(&tensor)?;
        drop(tensor);

        if probabilities.len() != self.labels.len() {
            return Err(InferenceError::ShapeMismatch {
                expected: self.labels.len(),
                got: probabilities.len(),
            }
            .into());
        }
        let (index, confidence) = probabilities
            .argmax()
            .ok_or(InferenceError::NoFiniteScores)?;
        let class_name = self
            .labels
            .get(index)
            .ok_or(InferenceError::ShapeMismatch {
                expected: self.labels.len(),
                got: probabilities.len(),
            })?
            .to_string();

        tracing::debug!(stage = %Stage::Completed, class_index = index);
        Ok(InferenceResult {
            class_name,
            confidence,
        })
    }
}
