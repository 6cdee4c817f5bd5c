use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Stage, StageKind};
use crate::error::{PipelineError, Result};
use crate::record::RecordBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Json,
    Jsonl,
    Csv,
}

impl FileType {
    fn extension(&self) -> &'static str {
        match self {
            FileType::Json => "json",
            FileType::Jsonl => "jsonl",
            FileType::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveConfig {
    pub local: LocalSaveConfig,
}

impl SaveConfig {
    pub fn validate(&self) -> Result<()> {
        self.local.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSaveConfig {
    pub directory: PathBuf,
    pub filetype: FileType,
    /// Output filename without extension; a UTC-timestamped default is
    /// generated when unset.
    pub filename: Option<String>,
}

impl Default for LocalSaveConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("processed"),
            filetype: FileType::Jsonl,
            filename: None,
        }
    }
}

impl LocalSaveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(PipelineError::MissingField("save.local.directory".into()));
        }
        Ok(())
    }

    fn save_path(&self) -> PathBuf {
        let stem = self
            .filename
            .clone()
            .unwrap_or_else(|| format!("dataset-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        self.directory
            .join(stem)
            .with_extension(self.filetype.extension())
    }
}

/// Save stage: terminal side-effecting writer. Returns the batch unchanged
/// so stages declared after it still see the full set.
pub struct SaveStage {
    config: LocalSaveConfig,
}

impl SaveStage {
    pub fn new(config: SaveConfig) -> Self {
        Self {
            config: config.local,
        }
    }

    fn write_json(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        Ok(std::fs::write(path, serde_json::to_vec_pretty(batch)?)?)
    }

    fn write_jsonl(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        let mut out = String::new();
        for record in batch {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(std::fs::write(path, out)?)
    }

    fn write_csv(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        // Header order comes from the first record's field order; records
        // in one run share a field set by contract.
        let headers: Vec<String> = match batch.first() {
            Some(first) => first.field_names().map(str::to_string).collect(),
            None => Vec::new(),
        };
        writer.write_record(&headers)?;
        for record in batch {
            let row: Vec<String> = headers
                .iter()
                .map(|h| match record.get(h) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Stage for SaveStage {
    fn kind(&self) -> StageKind {
        StageKind::Save
    }

    async fn apply(&self, batch: RecordBatch) -> Result<RecordBatch> {
        std::fs::create_dir_all(&self.config.directory)?;
        let path = self.config.save_path();
        match self.config.filetype {
            FileType::Json => self.write_json(&path, &batch)?,
            FileType::Jsonl => self.write_jsonl(&path, &batch)?,
            FileType::Csv => self.write_csv(&path, &batch)?,
        }
        info!(path = %path.display(), records = batch.len(), "saved batch");
        Ok(batch)
    }
}
