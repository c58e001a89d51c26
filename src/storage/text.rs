//! Line-oriented text file connectors
//!
//! Input lines are `key:image`; output is one JSON object per line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tracing::{debug, info};

use crate::service::types::{InputRecord, OutputRecord};

use super::traits::{PredictionSink, RecordSource, SourceItem};

/// Reads `key:image` records from a text file
pub struct TextSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl TextSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open input file {}", path.display()))?;

        info!("Reading records from {}", path.display());
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

#[async_trait]
impl RecordSource for TextSource {
    async fn next_record(&mut self) -> Result<Option<SourceItem>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            self.line_no += 1;

            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                debug!("Skipping blank line {}", self.line_no);
                continue;
            }
            return Ok(Some(InputRecord::from_line(line)));
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes predictions as JSON lines
pub struct TextSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TextSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create output file {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl PredictionSink for TextSink {
    async fn write(&mut self, records: &[OutputRecord]) -> Result<()> {
        for record in records {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            self.writer.write_all(&line).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        info!("Predictions written to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
