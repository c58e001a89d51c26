//! OpenVINO runtime
//!
//! Restores an exported IR checkpoint (`export.xml` graph + `export.bin`
//! weights) and binds the manifest's tensor names to a compiled model.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use ndarray::Array2;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{InferenceError, ModelLoadError};

use super::checkpoint::{CheckpointPath, Signature};
use super::session::{FeedRow, FetchRow, InferenceSession, ModelRuntime};

/// Graph definition file inside a checkpoint
pub const GRAPH_FILE: &str = "export.xml";
/// Serialized weights file inside a checkpoint
pub const WEIGHTS_FILE: &str = "export.bin";

/// Wrapper for OpenVINO Core that implements Send + Sync
struct SafeCore(Core);
// SAFETY: every access goes through the runtime's mutex.
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
struct SafeCompiledModel(CompiledModel);
// SAFETY: only reachable through the session's mutex.
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

/// OpenVINO-backed model runtime
pub struct OpenVinoRuntime {
    core: Mutex<SafeCore>,
    device: String,
}

impl OpenVinoRuntime {
    /// Create a runtime compiling models for `device` (e.g. "CPU")
    pub fn new(device: &str) -> anyhow::Result<Self> {
        let core = Core::new().map_err(|e| anyhow::anyhow!("Failed to create OpenVINO core: {}", e))?;
        Ok(Self {
            core: Mutex::new(SafeCore(core)),
            device: device.to_string(),
        })
    }
}

impl ModelRuntime for OpenVinoRuntime {
    fn name(&self) -> &str {
        "openvino"
    }

    fn open(
        &self,
        checkpoint: &CheckpointPath,
        signature: &Signature,
    ) -> Result<Box<dyn InferenceSession>, ModelLoadError> {
        let (graph, weights) = artifact_paths(checkpoint)?;

        let mut core = self.core.lock();
        let model = core
            .read_model_from_file(&graph.to_string_lossy(), &weights.to_string_lossy())
            .map_err(|e| load_error(checkpoint, e))?;

        let mut compiled = core
            .compile_model(&model, self.device.as_str().into())
            .map_err(|e| load_error(checkpoint, e))?;

        // Resolve every signature tensor against a scratch request
        let scratch = compiled
            .create_infer_request()
            .map_err(|e| load_error(checkpoint, e))?;
        let names = signature.input_names().into_iter().chain(signature.output_names());
        for name in names {
            if scratch.get_tensor(name).is_err() {
                return Err(ModelLoadError::UnresolvedTensor {
                    path: checkpoint.to_string(),
                    tensor: name.to_string(),
                });
            }
        }
        debug!("Compiled {} for device {}", checkpoint, self.device);

        Ok(Box::new(OpenVinoSession {
            compiled: Mutex::new(SafeCompiledModel(compiled)),
            signature: signature.clone(),
        }))
    }
}

/// Compiled model plus its bound signature
struct OpenVinoSession {
    compiled: Mutex<SafeCompiledModel>,
    signature: Signature,
}

impl OpenVinoSession {
    /// Infer requests are independent; only their creation needs the compiled model exclusively.
    fn infer_request(&self) -> Result<InferRequest, InferenceError> {
        self.compiled
            .lock()
            .0
            .create_infer_request()
            .map_err(runtime_error)
    }
}

impl InferenceSession for OpenVinoSession {
    fn run(&self, batch: &[FeedRow<'_>]) -> Result<Vec<FetchRow>, InferenceError> {
        let features = feature_matrix(batch)?;
        let (rows, width) = features.dim();
        let keys: Vec<i64> = batch.iter().map(|row| row.key).collect();

        let key_shape = Shape::new(&[rows as i64]).map_err(runtime_error)?;
        let mut key_tensor = Tensor::new(ElementType::I64, &key_shape).map_err(runtime_error)?;
        write_i64(key_tensor.get_raw_data_mut().map_err(runtime_error)?, &keys)?;

        let image_shape = Shape::new(&[rows as i64, width as i64]).map_err(runtime_error)?;
        let mut image_tensor = Tensor::new(ElementType::F32, &image_shape).map_err(runtime_error)?;
        let values: Vec<f32> = features.iter().copied().collect();
        write_f32(image_tensor.get_raw_data_mut().map_err(runtime_error)?, &values)?;

        let mut request = self.infer_request()?;
        request
            .set_tensor(&self.signature.input_key, &key_tensor)
            .map_err(runtime_error)?;
        request
            .set_tensor(&self.signature.input_image, &image_tensor)
            .map_err(runtime_error)?;
        request.infer().map_err(runtime_error)?;

        let key_out = request
            .get_tensor(&self.signature.output_key)
            .map_err(runtime_error)?;
        let scores_out = request
            .get_tensor(&self.signature.output_scores)
            .map_err(runtime_error)?;

        let out_keys = read_keys(key_out.get_raw_data().map_err(runtime_error)?, rows)?;
        let scores = read_scores(scores_out.get_raw_data().map_err(runtime_error)?, rows)?;

        Ok(out_keys
            .into_iter()
            .zip(scores.outer_iter())
            .map(|(key, row)| FetchRow {
                key,
                scores: row.to_vec(),
            })
            .collect())
    }
}

/// Locate the graph and weights files of a checkpoint
fn artifact_paths(checkpoint: &CheckpointPath) -> Result<(PathBuf, PathBuf), ModelLoadError> {
    let graph = checkpoint.join(GRAPH_FILE);
    let weights = checkpoint.join(WEIGHTS_FILE);
    for artifact in [&graph, &weights] {
        if !artifact.is_file() {
            return Err(ModelLoadError::MissingArtifact {
                path: checkpoint.to_string(),
                artifact: artifact.display().to_string(),
            });
        }
    }
    Ok((graph, weights))
}

fn load_error(checkpoint: &CheckpointPath, e: impl std::fmt::Display) -> ModelLoadError {
    ModelLoadError::Runtime {
        path: checkpoint.to_string(),
        reason: e.to_string(),
    }
}

fn runtime_error(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::Runtime(e.to_string())
}

/// Parse every row's tokens into a dense `[rows, width]` matrix
fn feature_matrix(batch: &[FeedRow<'_>]) -> Result<Array2<f32>, InferenceError> {
    let width = batch.first().map(|row| row.features.len()).unwrap_or(0);
    let mut values = Vec::with_capacity(batch.len() * width);

    for row in batch {
        if row.features.len() != width {
            return Err(InferenceError::ShapeMismatch {
                expected: width,
                actual: row.features.len(),
            });
        }
        for (index, token) in row.features.iter().enumerate() {
            let value = token
                .trim()
                .parse::<f32>()
                .map_err(|_| InferenceError::InvalidFeature {
                    index,
                    token: token.to_string(),
                })?;
            values.push(value);
        }
    }

    Array2::from_shape_vec((batch.len(), width), values)
        .map_err(|e| InferenceError::BadOutput(e.to_string()))
}

fn write_i64(dst: &mut [u8], values: &[i64]) -> Result<(), InferenceError> {
    if dst.len() != values.len() * 8 {
        return Err(InferenceError::BadOutput(format!(
            "key tensor holds {} bytes, expected {}",
            dst.len(),
            values.len() * 8
        )));
    }
    for (chunk, value) in dst.chunks_exact_mut(8).zip(values) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
    Ok(())
}

fn write_f32(dst: &mut [u8], values: &[f32]) -> Result<(), InferenceError> {
    if dst.len() != values.len() * 4 {
        return Err(InferenceError::BadOutput(format!(
            "image tensor holds {} bytes, expected {}",
            dst.len(),
            values.len() * 4
        )));
    }
    for (chunk, value) in dst.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
    Ok(())
}

/// Output keys may be exported as i64 or i32
fn read_keys(raw: &[u8], rows: usize) -> Result<Vec<i64>, InferenceError> {
    if rows == 0 || raw.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }
    match raw.len() / rows {
        8 => Ok(raw
            .chunks_exact(8)
            .map(|c| i64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()),
        4 => Ok(raw
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as i64)
            .collect()),
        other => Err(InferenceError::BadOutput(format!(
            "unsupported key element size: {} bytes",
            other
        ))),
    }
}

/// Score tensor is `[rows, classes]` f32
fn read_scores(raw: &[u8], rows: usize) -> Result<Array2<f32>, InferenceError> {
    if rows == 0 || raw.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }
    if raw.len() % (rows * 4) != 0 {
        return Err(InferenceError::BadOutput(format!(
            "{} score bytes do not split into {} rows",
            raw.len(),
            rows
        )));
    }
    let values: Vec<f32> = raw
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let classes = values.len() / rows;
    Array2::from_shape_vec((rows, classes), values)
        .map_err(|e| InferenceError::BadOutput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_feature_matrix() {
        let batch = vec![
            FeedRow { key: 1, features: vec!["1", "2.5", " 3"] },
            FeedRow { key: 2, features: vec!["4", "5", "6"] },
        ];
        let m = feature_matrix(&batch).unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[0, 1]], 2.5);
        assert_eq!(m[[0, 2]], 3.0);
        assert_eq!(m[[1, 0]], 4.0);
    }

    #[test]
    fn test_feature_matrix_rejects_bad_tokens() {
        let batch = vec![FeedRow { key: 1, features: vec!["1", "x"] }];
        assert_eq!(
            feature_matrix(&batch).unwrap_err(),
            InferenceError::InvalidFeature { index: 1, token: "x".to_string() }
        );

        let ragged = vec![
            FeedRow { key: 1, features: vec!["1", "2"] },
            FeedRow { key: 2, features: vec!["1"] },
        ];
        assert_eq!(
            feature_matrix(&ragged).unwrap_err(),
            InferenceError::ShapeMismatch { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn test_read_keys_by_element_size() {
        let wide: Vec<u8> = [7i64, 9].iter().flat_map(|v| v.to_ne_bytes()).collect();
        assert_eq!(read_keys(&wide, 2).unwrap(), vec![7, 9]);

        let narrow: Vec<u8> = [7i32, 9].iter().flat_map(|v| v.to_ne_bytes()).collect();
        assert_eq!(read_keys(&narrow, 2).unwrap(), vec![7, 9]);

        assert_eq!(read_keys(&[], 1).unwrap_err(), InferenceError::EmptyOutput);
    }

    #[test]
    fn test_read_scores_shape() {
        let raw: Vec<u8> = [0.1f32, 0.9, 0.3, 0.7]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let scores = read_scores(&raw, 2).unwrap();
        assert_eq!(scores.dim(), (2, 2));
        assert_eq!(scores.row(1).to_vec(), vec![0.3, 0.7]);

        assert!(matches!(read_scores(&raw[..12], 2), Err(InferenceError::BadOutput(_))));
    }

    #[test]
    fn test_write_checks_tensor_size() {
        let mut buf = vec![0u8; 8];
        write_f32(&mut buf, &[1.0, 2.0]).unwrap();
        assert_eq!(&buf[4..], &2.0f32.to_ne_bytes());
        assert!(write_i64(&mut buf, &[1, 2]).is_err());
    }

    #[test]
    fn test_artifact_paths() {
        let dir = tempdir().unwrap();
        let ckpt = crate::engine::testing::write_checkpoint(dir.path());

        let err = artifact_paths(&ckpt).unwrap_err();
        assert!(matches!(err, ModelLoadError::MissingArtifact { .. }));

        std::fs::write(dir.path().join(GRAPH_FILE), "<net/>").unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), [0u8; 4]).unwrap();
        let (graph, weights) = artifact_paths(&ckpt).unwrap();
        assert!(graph.ends_with(GRAPH_FILE));
        assert!(weights.ends_with(WEIGHTS_FILE));
    }
}
