//! Batch Prediction Library

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod storage;

pub use config::Config;
pub use error::{InferenceError, MalformedRecordError, ModelLoadError, PredictError};
