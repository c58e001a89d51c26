//! Record types flowing through the pipeline

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::MalformedRecordError;

/// Record identifier as read from a source: integer columns stay integers,
/// text lines stay text until the predictor parses them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Parse the key as an integer
    pub fn as_int(&self) -> Result<i64, MalformedRecordError> {
        match self {
            RecordKey::Int(v) => Ok(*v),
            RecordKey::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| MalformedRecordError::InvalidKey(s.clone())),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(v: i64) -> Self {
        RecordKey::Int(v)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Text(s.to_string())
    }
}

/// Normalized input record
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputRecord {
    pub key: RecordKey,
    /// Comma-separated feature string
    #[serde(default)]
    pub image: Option<String>,
}

impl InputRecord {
    pub fn new(key: impl Into<RecordKey>, image: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            image: Some(image.into()),
        }
    }

    /// Normalize a `key:image` line
    pub fn from_line(line: &str) -> Result<Self, MalformedRecordError> {
        let mut parts = line.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(image), None) => Ok(Self {
                key: RecordKey::Text(key.to_string()),
                image: Some(image.to_string()),
            }),
            _ => Err(MalformedRecordError::InvalidLine(line.to_string())),
        }
    }

    /// Split the image field into raw feature tokens
    pub fn feature_tokens(&self) -> Result<Vec<&str>, MalformedRecordError> {
        let image = self
            .image
            .as_deref()
            .ok_or(MalformedRecordError::MissingField("image"))?;
        if image.trim().is_empty() {
            return Err(MalformedRecordError::EmptyImage);
        }
        Ok(image.split(',').collect())
    }
}

/// Prediction for one record: `key` followed by `pred0..predN`
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub key: i64,
    pub scores: Vec<f32>,
}

impl OutputRecord {
    pub fn new(key: i64, scores: Vec<f32>) -> Self {
        Self { key, scores }
    }

    /// Number of `pred*` fields
    pub fn width(&self) -> usize {
        self.scores.len()
    }

    /// Field names in output order
    pub fn field_names(width: usize) -> Vec<String> {
        std::iter::once("key".to_string())
            .chain((0..width).map(|i| format!("pred{}", i)))
            .collect()
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len() + 1))?;
        map.serialize_entry("key", &self.key)?;
        for (i, score) in self.scores.iter().enumerate() {
            map.serialize_entry(&format!("pred{}", i), score)?;
        }
        map.end()
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub read: u64,
    pub written: u64,
    pub skipped: u64,
}
