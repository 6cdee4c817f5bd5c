use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Stage, StageKind};
use crate::error::{PipelineError, Result};
use crate::record::{Record, RecordBatch};

/// Merges several source fields into one target field with a separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergerConfig {
    pub fields: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    pub merged_field: String,
    /// Drop the source fields after merging.
    #[serde(default)]
    pub remove_merged: bool,
}

fn default_separator() -> String {
    " ".to_string()
}

/// Renders a whole record (or a subset of its fields) into one text field,
/// the shape downstream dedup and analysis expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToTextConfig {
    /// Fields to render; all fields when empty.
    pub fields: Vec<String>,
    pub target: String,
    pub separator: String,
}

impl Default for ToTextConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            target: "text".to_string(),
            separator: "\n".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatConfig {
    pub merger: Option<MergerConfig>,
    /// Field renames applied after merging, old name to new name.
    pub rename: std::collections::BTreeMap<String, String>,
    pub to_text: Option<ToTextConfig>,
}

impl FormatConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(merger) = &self.merger {
            if merger.fields.is_empty() {
                return Err(PipelineError::MissingField("format.merger.fields".into()));
            }
            if merger.merged_field.is_empty() {
                return Err(PipelineError::MissingField(
                    "format.merger.merged_field".into(),
                ));
            }
        }
        if let Some(to_text) = &self.to_text {
            if to_text.target.is_empty() {
                return Err(PipelineError::MissingField("format.to_text.target".into()));
            }
        }
        Ok(())
    }
}

/// Format stage: a pure per-record mapping. Cardinality is preserved; an
/// empty config is the identity.
pub struct FormatStage {
    config: FormatConfig,
}

impl FormatStage {
    pub fn new(config: FormatConfig) -> Self {
        Self { config }
    }

    fn render(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn apply_one(&self, mut record: Record) -> Record {
        if let Some(merger) = &self.config.merger {
            let merged = merger
                .fields
                .iter()
                .filter_map(|f| record.get(f).map(Self::render))
                .collect::<Vec<_>>()
                .join(&merger.separator);
            if merger.remove_merged {
                for field in &merger.fields {
                    record.remove(field);
                }
            }
            record.set(merger.merged_field.clone(), Value::String(merged));
        }

        for (old, new) in &self.config.rename {
            if let Some(value) = record.remove(old) {
                record.set(new.clone(), value);
            }
        }

        if let Some(to_text) = &self.config.to_text {
            let fields: Vec<String> = if to_text.fields.is_empty() {
                record.field_names().map(str::to_string).collect()
            } else {
                to_text.fields.clone()
            };
            let text = fields
                .iter()
                .filter_map(|f| record.get(f).map(Self::render))
                .collect::<Vec<_>>()
                .join(&to_text.separator);
            record.set(to_text.target.clone(), Value::String(text));
        }

        record
    }
}

#[async_trait]
impl Stage for FormatStage {
    fn kind(&self) -> StageKind {
        StageKind::Format
    }

    async fn apply(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let before = batch.len();
        let batch: RecordBatch = batch.into_iter().map(|r| self.apply_one(r)).collect();
        debug_assert_eq!(before, batch.len());
        debug!(records = batch.len(), "formatted batch");
        Ok(batch)
    }
}
