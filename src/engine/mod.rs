//! Inference engine module
//!
//! Provides model loading and caching with:
//! - Checkpoint manifest parsing
//! - Lazy per-checkpoint loading shared across workers
//! - A pluggable runtime (OpenVINO by default)

pub mod cache;
pub mod checkpoint;
pub mod openvino_runtime;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::ModelCache;
pub use checkpoint::{CheckpointPath, Signature};
pub use openvino_runtime::OpenVinoRuntime;
pub use session::{FeedRow, FetchRow, InferenceSession, LoadedModel, ModelRuntime};
