//! Service layer module

pub mod predictor;
pub mod types;

pub use predictor::RecordPredictor;
pub use types::*;
