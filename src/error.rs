//! Error taxonomy for model loading and record prediction

use thiserror::Error;

/// Failure to bring a checkpoint into memory. Fatal for the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    /// Checkpoint path was empty
    #[error("checkpoint path is empty")]
    EmptyPath,

    /// Checkpoint directory does not exist or is not a directory
    #[error("checkpoint directory not found: {path}")]
    MissingCheckpoint { path: String },

    /// Manifest could not be read or parsed
    #[error("invalid manifest for checkpoint {path}: {reason}")]
    Manifest { path: String, reason: String },

    /// Manifest parsed but a required logical name is absent
    #[error("manifest for checkpoint {path} has no `{section}.{name}` entry")]
    MissingSignatureEntry {
        path: String,
        section: &'static str,
        name: &'static str,
    },

    /// A model artifact expected by the runtime is missing
    #[error("checkpoint {path} is missing artifact {artifact}")]
    MissingArtifact { path: String, artifact: String },

    /// A tensor named in the manifest is not present in the restored graph
    #[error("tensor `{tensor}` not found in model at {path}")]
    UnresolvedTensor { path: String, tensor: String },

    /// The inference runtime rejected the model
    #[error("runtime failed to load {path}: {reason}")]
    Runtime { path: String, reason: String },
}

/// Input record does not have the expected shape
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedRecordError {
    #[error("record key `{0}` is not an integer")]
    InvalidKey(String),

    #[error("record has no `{0}` field")]
    MissingField(&'static str),

    #[error("record image field is empty")]
    EmptyImage,

    #[error("line is not of the form key:image: {0:?}")]
    InvalidLine(String),
}

/// Failure raised while running the model on a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("feature {index} is not numeric: {token:?}")]
    InvalidFeature { index: usize, token: String },

    #[error("feature width mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("model returned no output for the batch")]
    EmptyOutput,

    #[error("model output is inconsistent: {0}")]
    BadOutput(String),

    #[error("inference runtime error: {0}")]
    Runtime(String),
}

/// Any failure of the record predictor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Malformed(#[from] MalformedRecordError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl PredictError {
    /// Whether the error must abort the run regardless of record policy
    pub fn is_fatal(&self) -> bool {
        matches!(self, PredictError::ModelLoad(_))
    }
}
