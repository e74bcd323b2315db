use crate::{
    config::ModelConfig,
    model_service::{Classifier, InferenceError, LoadError, ModelLoader, ProbabilityVector},
    preprocess::ImageTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

/// Builds the ONNX Runtime sessions on first use.
#[derive(Debug, Clone)]
pub struct OrtModelLoader {
    model_path: PathBuf,
    num_instances: usize,
    num_classes: usize,
}

impl OrtModelLoader {
    pub fn new(model_config: &ModelConfig, num_classes: usize) -> Self {
        Self {
            model_path: model_config.get_path(),
            num_instances: model_config.num_instances.max(1),
            num_classes,
        }
    }
}

impl ModelLoader for OrtModelLoader {
    type Model = OrtClassifier;

    fn load(&self) -> Result<OrtClassifier, LoadError> {
        if !self.model_path.exists() {
            return Err(LoadError::NotFound(self.model_path.display().to_string()));
        }

        let sessions = (0..self.num_instances)
            .map(|_| {
                let session = Session::builder()
                    .map_err(|e| LoadError::Invalid(e.to_string()))?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(|e| LoadError::Invalid(e.to_string()))?
                    .commit_from_file(&self.model_path)
                    .map_err(|e| LoadError::Invalid(e.to_string()))?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, LoadError>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            sessions.len(),
            self.model_path
        );

        Ok(OrtClassifier {
            sessions,
            counter: AtomicUsize::new(0),
            num_classes: self.num_classes,
        })
    }
}

/// A small pool of sessions. A session runs one request at a time, so requests are spread
/// round-robin and serialized per session.
pub struct OrtClassifier {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    num_classes: usize,
}

impl Classifier for OrtClassifier {
    fn predict(&self, input: &ImageTensor) -> Result<ProbabilityVector, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Runtime(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Runtime(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Runtime(format!("failed to extract tensor: {}", e)))?;

        if data.len() != self.num_classes {
            return Err(InferenceError::ShapeMismatch {
                expected: self.num_classes,
                got: data.len(),
            });
        }

        Ok(ProbabilityVector::new(data.to_vec()))
    }
}
