//! Connector abstraction traits
//!
//! Sources yield normalized input records, sinks consume predictions.
//! Implementations exist for line-oriented text files and SQLite tables.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::MalformedRecordError;
use crate::service::types::{InputRecord, OutputRecord};

/// A record read from a source, or the reason it could not be normalized
pub type SourceItem = Result<InputRecord, MalformedRecordError>;

/// Source connector trait
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, `None` once the source is exhausted.
    /// The outer error is an I/O failure; the inner one a malformed record.
    async fn next_record(&mut self) -> Result<Option<SourceItem>>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Sink connector trait
#[async_trait]
pub trait PredictionSink: Send {
    /// Append predictions
    async fn write(&mut self, records: &[OutputRecord]) -> Result<()>;

    /// Flush and close; called once after the last write
    async fn finish(&mut self) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}
