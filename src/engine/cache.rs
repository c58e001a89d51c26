//! Model Cache
//!
//! Lazily loads one model per checkpoint path and hands out shared handles.
//! Every path owns its own slot, so a slow load only blocks callers waiting
//! for that same path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::ModelLoadError;

use super::checkpoint::CheckpointPath;
use super::session::{LoadedModel, ModelRuntime};

type Slot = Arc<RwLock<Option<Arc<LoadedModel>>>>;

/// Checkpoint-keyed model cache with guarded lazy initialization
pub struct ModelCache {
    runtime: Arc<dyn ModelRuntime>,
    slots: RwLock<HashMap<CheckpointPath, Slot>>,
}

impl ModelCache {
    /// Create an empty cache backed by the given runtime
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Get the model for `checkpoint`, loading it on first use
    ///
    /// A failed load leaves the path's slot empty. An empty slot is not a
    /// cache entry: `is_loaded` reports false and the next call retries the
    /// load.
    pub fn get_model(&self, checkpoint: &CheckpointPath) -> Result<Arc<LoadedModel>, ModelLoadError> {
        let slot = self.slot(checkpoint);

        // Try read lock first
        if let Some(model) = slot.read().as_ref() {
            debug!("Model cache hit: {}", checkpoint);
            return Ok(model.clone());
        }

        let mut write_guard = slot.write();

        // Double-check after acquiring write lock
        if let Some(model) = write_guard.as_ref() {
            return Ok(model.clone());
        }

        info!("Loading model from {} ({})", checkpoint, self.runtime.name());
        let start = Instant::now();

        let model = match LoadedModel::load(self.runtime.as_ref(), checkpoint) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                warn!("Failed to load model from {}: {}", checkpoint, e);
                return Err(e);
            }
        };

        info!("Model {} loaded in {:?}", checkpoint, start.elapsed());
        *write_guard = Some(model.clone());

        Ok(model)
    }

    /// Check if a model is loaded for `checkpoint`
    pub fn is_loaded(&self, checkpoint: &CheckpointPath) -> bool {
        self.slots
            .read()
            .get(checkpoint)
            .map(|slot| slot.read().is_some())
            .unwrap_or(false)
    }

    /// Paths with a loaded model, sorted
    pub fn loaded_paths(&self) -> Vec<CheckpointPath> {
        let mut paths: Vec<CheckpointPath> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.read().is_some())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Release every cached model. Handles already given out stay valid until dropped.
    pub fn shutdown(&self) {
        let slots = std::mem::take(&mut *self.slots.write());
        for (path, slot) in slots {
            if slot.write().take().is_some() {
                info!("Unloading model: {}", path);
            }
        }
    }

    fn slot(&self, checkpoint: &CheckpointPath) -> Slot {
        if let Some(slot) = self.slots.read().get(checkpoint) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(checkpoint.clone())
            .or_default()
            .clone()
    }
}

impl Drop for ModelCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
