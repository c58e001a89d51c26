//! Checkpoint directory contract
//!
//! A checkpoint is a directory holding the exported model artifacts and a
//! `manifest.json` that maps logical input/output names to tensor names:
//!
//! ```json
//! {
//!   "inputs":  { "key": "key_in", "image": "image" },
//!   "outputs": { "key": "key_out", "scores": "scores" }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ModelLoadError;

/// Manifest file name inside a checkpoint directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Location of an exported model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointPath(String);

impl CheckpointPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn join(&self, file: &str) -> PathBuf {
        self.as_path().join(file)
    }

    /// Ensure the path names an existing directory
    pub fn validate(&self) -> Result<(), ModelLoadError> {
        if self.0.is_empty() {
            return Err(ModelLoadError::EmptyPath);
        }
        if !self.as_path().is_dir() {
            return Err(ModelLoadError::MissingCheckpoint {
                path: self.0.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for CheckpointPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckpointPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for CheckpointPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    inputs: HashMap<String, String>,
    outputs: HashMap<String, String>,
}

/// Tensor names the predictor feeds and fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub input_key: String,
    pub input_image: String,
    pub output_key: String,
    pub output_scores: String,
}

impl Signature {
    /// Read `manifest.json` from a checkpoint directory
    pub fn load(checkpoint: &CheckpointPath) -> Result<Self, ModelLoadError> {
        let manifest_path = checkpoint.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
            ModelLoadError::Manifest {
                path: checkpoint.to_string(),
                reason: format!("{}: {}", manifest_path.display(), e),
            }
        })?;
        Self::parse(checkpoint, &content)
    }

    /// Parse manifest content for the given checkpoint
    pub fn parse(checkpoint: &CheckpointPath, content: &str) -> Result<Self, ModelLoadError> {
        let manifest: Manifest =
            serde_json::from_str(content).map_err(|e| ModelLoadError::Manifest {
                path: checkpoint.to_string(),
                reason: e.to_string(),
            })?;

        let lookup = |map: &HashMap<String, String>, section, name| {
            map.get(name)
                .filter(|tensor| !tensor.is_empty())
                .cloned()
                .ok_or_else(|| ModelLoadError::MissingSignatureEntry {
                    path: checkpoint.to_string(),
                    section,
                    name,
                })
        };

        Ok(Self {
            input_key: lookup(&manifest.inputs, "inputs", "key")?,
            input_image: lookup(&manifest.inputs, "inputs", "image")?,
            output_key: lookup(&manifest.outputs, "outputs", "key")?,
            output_scores: lookup(&manifest.outputs, "outputs", "scores")?,
        })
    }

    pub fn input_names(&self) -> [&str; 2] {
        [&self.input_key, &self.input_image]
    }

    pub fn output_names(&self) -> [&str; 2] {
        [&self.output_key, &self.output_scores]
    }
}
