//! Runtime seam between the cache and a concrete inference backend

use crate::error::{InferenceError, ModelLoadError};

use super::checkpoint::{CheckpointPath, Signature};

/// One row of a feed batch: the record key and its raw feature tokens
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow<'a> {
    pub key: i64,
    pub features: Vec<&'a str>,
}

/// One row fetched back from the model
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRow {
    pub key: i64,
    pub scores: Vec<f32>,
}

/// A runnable inference context bound to one checkpoint's signature.
///
/// Implementations must tolerate concurrent `run` calls; if the backend does
/// not, the session serializes internally.
pub trait InferenceSession: Send + Sync {
    /// Run a batch, returning one fetched row per fed row in the same order
    fn run(&self, batch: &[FeedRow<'_>]) -> Result<Vec<FetchRow>, InferenceError>;
}

/// Opens checkpoints into sessions
pub trait ModelRuntime: Send + Sync {
    /// Short runtime name for logs
    fn name(&self) -> &str;

    /// Restore the model at `checkpoint` and resolve every tensor in `signature`
    fn open(
        &self,
        checkpoint: &CheckpointPath,
        signature: &Signature,
    ) -> Result<Box<dyn InferenceSession>, ModelLoadError>;
}

/// A fully constructed model. Never mutated after creation.
pub struct LoadedModel {
    checkpoint: CheckpointPath,
    signature: Signature,
    session: Box<dyn InferenceSession>,
}

impl LoadedModel {
    /// Validate the checkpoint, read its manifest and open a session
    pub fn load(
        runtime: &dyn ModelRuntime,
        checkpoint: &CheckpointPath,
    ) -> Result<Self, ModelLoadError> {
        checkpoint.validate()?;
        let signature = Signature::load(checkpoint)?;
        let session = runtime.open(checkpoint, &signature)?;

        Ok(Self {
            checkpoint: checkpoint.clone(),
            signature,
            session,
        })
    }

    pub fn checkpoint(&self) -> &CheckpointPath {
        &self.checkpoint
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Run the model over a batch, checking the backend kept the batch size
    pub fn predict(&self, batch: &[FeedRow<'_>]) -> Result<Vec<FetchRow>, InferenceError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.session.run(batch)?;
        if rows.is_empty() {
            return Err(InferenceError::EmptyOutput);
        }
        if rows.len() != batch.len() {
            return Err(InferenceError::BadOutput(format!(
                "fed {} rows, fetched {}",
                batch.len(),
                rows.len()
            )));
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("checkpoint", &self.checkpoint)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}
