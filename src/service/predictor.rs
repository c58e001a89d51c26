//! Record Predictor
//!
//! Turns one input record into one prediction using the model cached for the
//! run's checkpoint.

use std::sync::Arc;

use tracing::trace;

use crate::engine::{CheckpointPath, FeedRow, ModelCache};
use crate::error::{InferenceError, PredictError};

use super::types::{InputRecord, OutputRecord};

/// Per-record prediction step shared by every worker of a run
pub struct RecordPredictor {
    cache: Arc<ModelCache>,
    checkpoint: CheckpointPath,
}

impl RecordPredictor {
    /// Create a predictor bound to one checkpoint
    pub fn new(cache: Arc<ModelCache>, checkpoint: CheckpointPath) -> Self {
        Self { cache, checkpoint }
    }

    pub fn checkpoint(&self) -> &CheckpointPath {
        &self.checkpoint
    }

    /// Load the model ahead of the first record
    pub fn warm_up(&self) -> Result<(), PredictError> {
        self.cache.get_model(&self.checkpoint)?;
        Ok(())
    }

    /// Predict a single record. Always yields exactly one output on success.
    pub fn process(&self, record: &InputRecord) -> Result<Vec<OutputRecord>, PredictError> {
        let model = self.cache.get_model(&self.checkpoint)?;

        let key = record.key.as_int()?;
        let features = record.feature_tokens()?;
        trace!("Predicting key {} with {} features", key, features.len());

        let fetched = model
            .predict(&[FeedRow { key, features }])?
            .into_iter()
            .next()
            .ok_or(InferenceError::EmptyOutput)?;

        Ok(vec![OutputRecord::new(fetched.key, fetched.scores)])
    }
}
