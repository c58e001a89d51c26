//! Command-line surface
//!
//! ```bash
//! batchpredict \
//!     --input images.txt \
//!     --output predictions.json \
//!     --model /models/mnist/export \
//!     --source text
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::config::{Config, RecordErrorPolicy};
use crate::engine::{CheckpointPath, ModelCache, OpenVinoRuntime};
use crate::pipeline::Pipeline;
use crate::service::{RecordPredictor, RunSummary};
use crate::storage::{self, SourceKind};

/// Run a checkpoint over a batch of records
#[derive(Parser, Debug, Clone)]
#[command(name = "batchpredict", version, about)]
pub struct Args {
    /// Input file, or `<database-file>:<table>` for table sources
    #[arg(long)]
    pub input: String,

    /// Output file, or `<database-file>:<table>` for table sinks
    #[arg(long)]
    pub output: String,

    /// Checkpoint directory of the model
    #[arg(long)]
    pub model: String,

    /// Data source kind
    #[arg(long, value_enum)]
    pub source: SourceKind,

    /// Configuration file (defaults to ./batchpredict.toml when present)
    #[arg(long, env = "BATCHPREDICT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Predictions in flight at once
    #[arg(long)]
    pub workers: Option<usize>,

    /// Inference device, e.g. CPU or GPU
    #[arg(long)]
    pub device: Option<String>,

    /// Policy for records that fail to predict
    #[arg(long, value_enum)]
    pub on_record_error: Option<RecordErrorPolicy>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of file configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(device) = &self.device {
            config.inference.device = device.clone();
        }
        if let Some(policy) = self.on_record_error {
            config.pipeline.on_record_error = policy;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    /// Execute the run described by these arguments
    pub async fn run(&self, config: &Config) -> Result<RunSummary> {
        info!("Input: {} ({:?})", self.input, self.source);
        info!("Output: {}", self.output);
        info!("Model: {}", self.model);
        info!("Device: {}", config.inference.device);

        let runtime = Arc::new(OpenVinoRuntime::new(&config.inference.device)?);
        let cache = Arc::new(ModelCache::new(runtime));
        let predictor = Arc::new(RecordPredictor::new(
            cache.clone(),
            CheckpointPath::new(self.model.clone()),
        ));

        let mut source =
            storage::open_source(self.source, &self.input, config.pipeline.table_page_size).await?;
        let mut sink = storage::open_sink(self.source, &self.output).await?;

        let pipeline = Pipeline::new(predictor, &config.pipeline);
        let result = pipeline.run(source.as_mut(), sink.as_mut()).await;

        cache.shutdown();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_flags() {
        let args = Args::try_parse_from([
            "batchpredict",
            "--input", "in.txt",
            "--output", "out.json",
            "--model", "/models/mnist",
            "--source", "text",
        ])
        .unwrap();
        assert_eq!(args.source, SourceKind::Text);
        assert_eq!(args.model, "/models/mnist");

        assert!(Args::try_parse_from(["batchpredict", "--input", "in.txt"]).is_err());
    }

    #[test]
    fn test_source_aliases() {
        for (value, expected) in [("cs", SourceKind::Text), ("bq", SourceKind::Table), ("table", SourceKind::Table)] {
            let args = Args::try_parse_from([
                "batchpredict",
                "--input", "w.db:images",
                "--output", "w.db:predictions",
                "--model", "m",
                "--source", value,
            ])
            .unwrap();
            assert_eq!(args.source, expected);
        }
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "batchpredict",
            "--input", "in.txt",
            "--output", "out.json",
            "--model", "m",
            "--source", "text",
            "--workers", "16",
            "--device", "GPU",
            "--on-record-error", "skip",
        ])
        .unwrap();

        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.pipeline.workers, 16);
        assert_eq!(config.inference.device, "GPU");
        assert_eq!(config.pipeline.on_record_error, RecordErrorPolicy::Skip);
        assert_eq!(config.logging.level, "info");
    }
}
