use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Stage, StageKind};
use crate::error::{PipelineError, Result};
use crate::record::{Record, RecordBatch};

/// Collaborator interface for pulling records from an external source.
/// The contract is a finite sequence; streaming internals are the
/// implementation's business.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Record>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub local: Option<LocalFileConfig>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { local: None }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.local {
            Some(local) => local.validate(),
            None => Err(PipelineError::MissingField("load.local".to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalFileConfig {
    /// Path to a `.json` (array of objects), `.jsonl`, or `.csv` file.
    pub path: PathBuf,
    /// Truncate the fetched sequence to the first N rows.
    #[serde(default)]
    pub take_rows: Option<usize>,
}

impl LocalFileConfig {
    pub fn validate(&self) -> Result<()> {
        match extension(&self.path) {
            Some("json") | Some("jsonl") | Some("csv") => Ok(()),
            _ => Err(PipelineError::Config(format!(
                "load.local.path '{}' must end in .json, .jsonl, or .csv",
                self.path.display()
            ))),
        }
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

/// Reads records from a local file. File type is chosen by extension.
pub struct LocalFileSource {
    config: LocalFileConfig,
}

impl LocalFileSource {
    pub fn new(config: LocalFileConfig) -> Self {
        Self { config }
    }

    fn read_json(&self, raw: &str) -> Result<Vec<Record>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| Record::from_value(item, i))
                .collect(),
            other => Record::from_value(other, 0).map(|r| vec![r]),
        }
    }

    fn read_jsonl(&self, raw: &str) -> Result<Vec<Record>> {
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                let value: serde_json::Value = serde_json::from_str(line)?;
                Record::from_value(value, i)
            })
            .collect()
    }

    fn read_csv(&self, raw: &str) -> Result<Vec<Record>> {
        let mut reader = csv::Reader::from_reader(raw.as_bytes());
        let headers = reader.headers()?.clone();
        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let mut record = Record::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                record.set(header, serde_json::Value::String(value.to_string()));
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordSource for LocalFileSource {
    async fn fetch(&self) -> Result<Vec<Record>> {
        let raw = tokio::fs::read_to_string(&self.config.path).await?;
        let mut records = match extension(&self.config.path) {
            Some("jsonl") => self.read_jsonl(&raw)?,
            Some("csv") => self.read_csv(&raw)?,
            _ => self.read_json(&raw)?,
        };
        if let Some(take) = self.config.take_rows {
            records.truncate(take);
        }
        Ok(records)
    }
}

/// Load stage: fetches from its source and appends to the incoming batch,
/// so multiple `load` entries in one job concatenate their output.
pub struct LoadStage {
    source: Box<dyn RecordSource>,
    path: PathBuf,
}

impl LoadStage {
    pub fn new(config: LoadConfig) -> Result<Self> {
        config.validate()?;
        let local = config
            .local
            .ok_or_else(|| PipelineError::MissingField("load.local".to_string()))?;
        let path = local.path.clone();
        Ok(Self {
            source: Box::new(LocalFileSource::new(local)),
            path,
        })
    }

    /// Wires an arbitrary source; used when loading is driven by a
    /// collaborator other than the local filesystem.
    pub fn with_source(source: Box<dyn RecordSource>, path: PathBuf) -> Self {
        Self { source, path }
    }
}

#[async_trait]
impl Stage for LoadStage {
    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    async fn apply(&self, mut batch: RecordBatch) -> Result<RecordBatch> {
        let fetched = self
            .source
            .fetch()
            .await
            .map_err(|e| PipelineError::collaborator("load", e))?;
        info!(source = %self.path.display(), records = fetched.len(), "loaded records");
        batch.extend(fetched);
        Ok(batch)
    }
}
