//! Pipeline runner
//!
//! Reads records from a source, predicts them on the blocking pool with a
//! bounded number in flight, and writes results to a sink. Output order is
//! not tied to input order.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{PipelineConfig, RecordErrorPolicy};
use crate::error::PredictError;
use crate::service::types::{OutputRecord, RunSummary};
use crate::service::RecordPredictor;
use crate::storage::{PredictionSink, RecordSource};

type Outcome = Result<Vec<OutputRecord>, PredictError>;

/// Drives source -> predictor -> sink
pub struct Pipeline {
    predictor: Arc<RecordPredictor>,
    workers: usize,
    policy: RecordErrorPolicy,
}

impl Pipeline {
    pub fn new(predictor: Arc<RecordPredictor>, config: &PipelineConfig) -> Self {
        Self {
            predictor,
            workers: config.workers.max(1),
            policy: config.on_record_error,
        }
    }

    /// Run to completion. Model-load failures always abort; other record
    /// failures follow the configured policy.
    pub async fn run(
        &self,
        source: &mut dyn RecordSource,
        sink: &mut dyn PredictionSink,
    ) -> Result<RunSummary> {
        info!(
            "Predicting {} -> {} with model {} ({} workers)",
            source.describe(),
            sink.describe(),
            self.predictor.checkpoint(),
            self.workers
        );
        let start = Instant::now();

        // Fail fast on a bad checkpoint before reading any input
        let predictor = self.predictor.clone();
        tokio::task::spawn_blocking(move || predictor.warm_up())
            .await
            .context("Model loading task panicked")??;

        let mut summary = RunSummary::default();
        let mut tasks: JoinSet<Outcome> = JoinSet::new();

        while let Some(item) = source.next_record().await? {
            summary.read += 1;

            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    self.handle(Err(e.into()), sink, &mut summary).await?;
                    continue;
                }
            };

            if tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    let outcome = joined.context("Prediction task panicked")?;
                    self.handle(outcome, sink, &mut summary).await?;
                }
            }

            let predictor = self.predictor.clone();
            tasks.spawn_blocking(move || predictor.process(&record));
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.context("Prediction task panicked")?;
            self.handle(outcome, sink, &mut summary).await?;
        }

        sink.finish().await?;

        info!(
            "Run finished in {:?}: {} read, {} written, {} skipped",
            start.elapsed(),
            summary.read,
            summary.written,
            summary.skipped
        );
        Ok(summary)
    }

    async fn handle(
        &self,
        outcome: Outcome,
        sink: &mut dyn PredictionSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match outcome {
            Ok(records) => {
                sink.write(&records).await?;
                summary.written += records.len() as u64;
                Ok(())
            }
            Err(e) if e.is_fatal() || self.policy == RecordErrorPolicy::Fail => Err(e.into()),
            Err(e) => {
                warn!("Skipping record: {}", e);
                summary.skipped += 1;
                Ok(())
            }
        }
    }
}
