//! Storage connectors for reading records and writing predictions

pub mod sqlite;
pub mod text;
pub mod traits;

use anyhow::Result;
use clap::ValueEnum;

pub use sqlite::{SqliteSink, SqliteSource, TableRef};
pub use text::{TextSink, TextSource};
pub use traits::{PredictionSink, RecordSource, SourceItem};

/// Which connector pair a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// `key:image` text lines in, JSON lines out
    #[value(alias = "cs")]
    Text,
    /// SQLite table in, SQLite table out
    #[value(alias = "bq")]
    Table,
}

/// Open the source connector for `input`
pub async fn open_source(
    kind: SourceKind,
    input: &str,
    page_size: usize,
) -> Result<Box<dyn RecordSource>> {
    let source: Box<dyn RecordSource> = match kind {
        SourceKind::Text => Box::new(TextSource::open(input).await?),
        SourceKind::Table => Box::new(SqliteSource::open(TableRef::parse(input)?, page_size).await?),
    };
    Ok(source)
}

/// Open the sink connector for `output`
pub async fn open_sink(kind: SourceKind, output: &str) -> Result<Box<dyn PredictionSink>> {
    let sink: Box<dyn PredictionSink> = match kind {
        SourceKind::Text => Box::new(TextSink::create(output).await?),
        SourceKind::Table => Box::new(SqliteSink::create(TableRef::parse(output)?).await?),
    };
    Ok(sink)
}
