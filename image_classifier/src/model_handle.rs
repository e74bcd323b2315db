use crate::{
    model_service::{Classifier, InferenceError, LoadError, ModelLoader, ProbabilityVector},
    preprocess::ImageTensor,
};
use once_cell::sync::OnceCell;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Owns the classifier and loads it exactly once.
///
/// Concurrent callers of [`ModelHandle::get`] block until the single load finishes. The
/// outcome is memoized: a failed load is reported to every later caller and is not retried.
pub struct ModelHandle<L: ModelLoader> {
    loader: L,
    model: OnceCell<Result<L::Model, LoadError>>,
}

impl<L: ModelLoader> ModelHandle<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Result<&L::Model, LoadError> {
        self.model
            .get_or_init(|| self.load())
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn is_initialized(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn infer(&self, input: &ImageTensor) -> Result<ProbabilityVector, ModelError> {
        let model = self.get()?;
        Ok(model.predict(input)?)
    }

    fn load(&self) -> Result<L::Model, LoadError> {
        tracing::info!("Loading classifier");
        let started = Instant::now();
        let result = self.loader.load();
        match &result {
            Ok(_) => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Classifier loaded"
            ),
            Err(e) => tracing::error!("Classifier failed to load, predictions disabled: {}", e),
        }
        result
    }
}
