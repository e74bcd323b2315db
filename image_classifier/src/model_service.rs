use crate::preprocess::ImageTensor;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("failed to load model: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("model returned {got} scores but {expected} class labels are configured")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("model returned no finite scores")]
    NoFiniteScores,
    #[error("inference failed: {0}")]
    Runtime(String),
}

/// Per-class scores in label order. Only used as a ranking signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index and score of the highest finite score. Ties go to the lowest index.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        self.0
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best, (index, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((index, score)),
            })
    }
}

impl From<Vec<f32>> for ProbabilityVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}

/// The trained network, seen from the outside as `predict(tensor) -> scores`.
///
/// Implementations must be safe to call from several blocking threads at once.
pub trait Classifier: Send + Sync + 'static {
    fn predict(&self, input: &ImageTensor) -> Result<ProbabilityVector, InferenceError>;
}

/// Produces the classifier. Called at most once per [`ModelHandle`](crate::model_handle::ModelHandle).
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Classifier;

    fn load(&self) -> Result<Self::Model, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_maximum() {
        let scores = ProbabilityVector::new(vec![0.1, 0.7, 0.1, 0.1]);
        assert_eq!(scores.argmax(), Some((1, 0.7)));
    }

    #[test]
    fn test_argmax_ties_go_to_lowest_index() {
        let scores = ProbabilityVector::new(vec![0.5, 0.5, 0.0, 0.0]);
        assert_eq!(scores.argmax(), Some((0, 0.5)));

        let scores = ProbabilityVector::new(vec![0.0, 0.3, 0.3, 0.3]);
        assert_eq!(scores.argmax(), Some((1, 0.3)));
    }

    #[test]
    fn test_argmax_skips_nan() {
        let scores = ProbabilityVector::new(vec![f32::NAN, 0.2, f32::NAN, 0.1]);
        assert_eq!(scores.argmax(), Some((1, 0.2)));

        let scores = ProbabilityVector::new(vec![f32::NAN]);
        assert_eq!(scores.argmax(), None);
        assert_eq!(ProbabilityVector::new(vec![]).argmax(), None);
    }
}
