//! Batch prediction configuration

use clap::ValueEnum;
use serde::Deserialize;
use tracing::Level;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Predictions in flight at once
    pub workers: usize,
    pub on_record_error: RecordErrorPolicy,
    /// Rows fetched per query by the table source
    pub table_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// What to do when a single record cannot be predicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordErrorPolicy {
    /// Abort the run
    Fail,
    /// Log and continue
    Skip,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "batchpredict.toml"
    }
}

impl LoggingConfig {
    /// Parsed log level, falling back to INFO
    pub fn max_level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            on_record_error: RecordErrorPolicy::Fail,
            table_page_size: 512,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batchpredict.toml");
        std::fs::write(
            &path,
            r#"
            [pipeline]
            workers = 8
            on_record_error = "skip"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.on_record_error, RecordErrorPolicy::Skip);
        assert_eq!(config.pipeline.table_page_size, 512);
        assert_eq!(config.inference.device, "CPU");
        assert_eq!(config.logging.max_level(), Level::DEBUG);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.on_record_error, RecordErrorPolicy::Fail);
        assert_eq!(config.logging.max_level(), Level::INFO);

        let bogus = LoggingConfig { level: "loud".to_string() };
        assert_eq!(bogus.max_level(), Level::INFO);
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/definitely/not/here.toml").is_err());
    }
}
