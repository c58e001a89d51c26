//! Batch Prediction
//!
//! Runs a cached model checkpoint over records from text files or SQLite
//! tables and writes one prediction per record.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use batchpredict::cli::Args;
use batchpredict::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let (mut config, config_note) = match &args.config {
        Some(path) => (Config::load(&path.to_string_lossy())?, format!("Loaded config from {}", path.display())),
        None => match Config::load(Config::default_path()) {
            Ok(config) => (config, format!("Loaded config from {}", Config::default_path())),
            Err(e) => (Config::default(), format!("Using default config ({})", e)),
        },
    };
    args.apply(&mut config);

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(config.logging.max_level())
        .with_target(false)
        .init();

    info!("Starting batchpredict v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", config_note);
    info!("  Workers: {}", config.pipeline.workers);
    info!("  On record error: {:?}", config.pipeline.on_record_error);

    let summary = args.run(&config).await?;

    info!(
        "Done: {} records read, {} predictions written, {} skipped",
        summary.read, summary.written, summary.skipped
    );
    Ok(())
}
