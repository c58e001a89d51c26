//! Deterministic runtime used by unit tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{InferenceError, ModelLoadError};

use super::checkpoint::{CheckpointPath, Signature, MANIFEST_FILE};
use super::session::{FeedRow, FetchRow, InferenceSession, ModelRuntime};

pub(crate) const TEST_MANIFEST: &str = r#"{
    "inputs": {"key": "key_in", "image": "image"},
    "outputs": {"key": "key_out", "scores": "scores"}
}"#;

/// Write a manifest into `dir` and return it as a checkpoint path
pub(crate) fn write_checkpoint(dir: &Path) -> CheckpointPath {
    std::fs::write(dir.join(MANIFEST_FILE), TEST_MANIFEST).unwrap();
    CheckpointPath::new(dir.to_str().unwrap())
}

/// Echoes the input key and returns fixed scores
pub(crate) struct EchoRuntime {
    scores: Vec<f32>,
    width: Option<usize>,
    load_delay: Duration,
    fail_next: AtomicBool,
    loads: AtomicUsize,
}

impl EchoRuntime {
    pub(crate) fn new(scores: Vec<f32>) -> Self {
        Self {
            scores,
            width: None,
            load_delay: Duration::ZERO,
            fail_next: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub(crate) fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub(crate) fn fail_first_load(self) -> Self {
        self.fail_next.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelRuntime for EchoRuntime {
    fn name(&self) -> &str {
        "echo"
    }

    fn open(
        &self,
        checkpoint: &CheckpointPath,
        _signature: &Signature,
    ) -> Result<Box<dyn InferenceSession>, ModelLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ModelLoadError::Runtime {
                path: checkpoint.to_string(),
                reason: "device busy".to_string(),
            });
        }

        Ok(Box::new(EchoSession {
            scores: self.scores.clone(),
            width: self.width,
        }))
    }
}

struct EchoSession {
    scores: Vec<f32>,
    width: Option<usize>,
}

impl InferenceSession for EchoSession {
    fn run(&self, batch: &[FeedRow<'_>]) -> Result<Vec<FetchRow>, InferenceError> {
        batch
            .iter()
            .map(|row| {
                if let Some(expected) = self.width {
                    if row.features.len() != expected {
                        return Err(InferenceError::ShapeMismatch {
                            expected,
                            actual: row.features.len(),
                        });
                    }
                }
                for (index, token) in row.features.iter().enumerate() {
                    token.trim().parse::<f32>().map_err(|_| InferenceError::InvalidFeature {
                        index,
                        token: token.to_string(),
                    })?;
                }
                Ok(FetchRow {
                    key: row.key,
                    scores: self.scores.clone(),
                })
            })
            .collect()
    }
}
