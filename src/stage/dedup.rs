use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Stage, StageKind};
use crate::dedup::{CachedEmbedder, Deduplicator, EmbeddingProvider, HashingEmbedder, HttpEmbedder};
use crate::error::{PipelineError, Result};
use crate::record::RecordBatch;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupStageConfig {
    pub semantic: SemanticDedupConfig,
}

impl DedupStageConfig {
    pub fn validate(&self) -> Result<()> {
        self.semantic.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SemanticDedupConfig {
    /// Field whose text is embedded and compared.
    pub column: String,
    /// Cosine-distance threshold in [0, 2]; records within it of a kept
    /// record are dropped.
    pub threshold: f32,
    /// Embedding model name; the built-in local embedder when it is
    /// "hashing-trigram", otherwise an OpenAI-compatible endpoint model.
    pub embeddings_model: String,
    /// Base URL of the embeddings endpoint; required for remote models.
    pub api_base_url: Option<String>,
    /// Cache computed vectors on disk, keyed by model + text content.
    pub cache_embeddings: bool,
    pub embeddings_directory: PathBuf,
    /// When set, dropped records are written here as JSONL for inspection.
    pub duplicates_path: Option<PathBuf>,
}

impl Default for SemanticDedupConfig {
    fn default() -> Self {
        Self {
            column: "messages".to_string(),
            threshold: 0.2,
            embeddings_model: "hashing-trigram".to_string(),
            api_base_url: None,
            cache_embeddings: false,
            embeddings_directory: PathBuf::from("embeddings"),
            duplicates_path: None,
        }
    }
}

impl SemanticDedupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.column.is_empty() {
            return Err(PipelineError::MissingField(
                "deduplicate.semantic.column".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.threshold) {
            return Err(PipelineError::Config(format!(
                "deduplicate.semantic.threshold must be within [0, 2], got {}",
                self.threshold
            )));
        }
        if self.is_local_model() {
            if self.api_base_url.is_some() {
                return Err(PipelineError::Config(
                    "deduplicate.semantic.api_base_url makes no sense with the \
                     built-in 'hashing-trigram' model"
                        .into(),
                ));
            }
        } else if self.api_base_url.is_none() {
            return Err(PipelineError::MissingField(
                "deduplicate.semantic.api_base_url".into(),
            ));
        }
        Ok(())
    }

    fn is_local_model(&self) -> bool {
        self.embeddings_model == "hashing-trigram"
    }

    fn build_provider(&self) -> Result<Box<dyn EmbeddingProvider>> {
        let provider: Box<dyn EmbeddingProvider> = if self.is_local_model() {
            Box::new(HashingEmbedder::default())
        } else {
            // validate() guarantees the endpoint is present for remote models
            let base_url = self
                .api_base_url
                .as_deref()
                .ok_or_else(|| PipelineError::MissingField("deduplicate.semantic.api_base_url".into()))?;
            let api_key = std::env::var("DATAPREP_API_KEY").unwrap_or_default();
            Box::new(HttpEmbedder::new(base_url, &self.embeddings_model, &api_key)?)
        };
        if self.cache_embeddings {
            return Ok(Box::new(CachedEmbedder::new(
                provider,
                &self.embeddings_directory,
            )?));
        }
        Ok(provider)
    }
}

/// Deduplicate stage: embeds the configured field and keeps only records
/// pairwise distinct under the threshold. The only stage that may shrink
/// the batch; kept records stay in input order.
pub struct DedupStage {
    config: SemanticDedupConfig,
    provider: Box<dyn EmbeddingProvider>,
}

impl DedupStage {
    pub fn new(config: DedupStageConfig) -> Result<Self> {
        config.validate()?;
        let provider = config.semantic.build_provider()?;
        Ok(Self {
            config: config.semantic,
            provider,
        })
    }

    fn write_duplicates(&self, path: &std::path::Path, dropped: &RecordBatch) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for record in dropped {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[async_trait]
impl Stage for DedupStage {
    fn kind(&self) -> StageKind {
        StageKind::Deduplicate
    }

    async fn apply(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let dedup =
            Deduplicator::new(self.provider.as_ref(), &self.config.column, self.config.threshold);
        let outcome = dedup.dedup(batch).await.map_err(|e| match e {
            // Data errors carry the record position and stand on their own
            data @ PipelineError::Data { .. } => data,
            other => PipelineError::collaborator("deduplicate", other),
        })?;
        if let Some(path) = &self.config.duplicates_path {
            self.write_duplicates(path, &outcome.dropped)?;
            info!(path = %path.display(), dropped = outcome.dropped.len(), "wrote duplicates side-file");
        }
        Ok(outcome.kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use serde_json::json;

    fn stage_config(threshold: f32) -> DedupStageConfig {
        DedupStageConfig {
            semantic: SemanticDedupConfig {
                column: "text".to_string(),
                threshold,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn byte_identical_records_collapse_to_first() {
        // Scenario: threshold 0 with identical text means identical
        // embeddings; only the first survives.
        let stage = DedupStage::new(stage_config(0.0)).unwrap();
        let batch: RecordBatch = (0..3)
            .map(|_| Record::from_value(json!({"text": "same exact content"}), 0).unwrap())
            .collect();
        let kept = stage.apply(batch).await.unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn distinct_records_all_survive() {
        let stage = DedupStage::new(stage_config(0.05)).unwrap();
        let batch: RecordBatch = ["a completely distinct sentence", "financial report Q3", "zebra migration patterns"]
            .iter()
            .map(|t| Record::from_value(json!({"text": t}), 0).unwrap())
            .collect();
        let kept = stage.apply(batch).await.unwrap();
        assert_eq!(kept.len(), 3);
    }

    #[tokio::test]
    async fn duplicates_side_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupes.jsonl");
        let mut config = stage_config(0.0);
        config.semantic.duplicates_path = Some(path.clone());
        let stage = DedupStage::new(config).unwrap();
        let batch: RecordBatch = (0..2)
            .map(|_| Record::from_value(json!({"text": "twin"}), 0).unwrap())
            .collect();
        let kept = stage.apply(batch).await.unwrap();
        assert_eq!(kept.len(), 1);
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[test]
    fn threshold_out_of_range_fails_validation() {
        assert!(stage_config(2.5).validate().is_err());
        assert!(stage_config(-0.1).validate().is_err());
    }

    #[test]
    fn local_model_with_endpoint_fails_validation() {
        // The built-in embedder never talks to an endpoint; configuring one
        // alongside it is a contradiction, not a silent preference.
        let mut config = stage_config(0.2);
        config.semantic.api_base_url = Some("https://api.example.com/v1".to_string());
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn remote_model_without_endpoint_fails_validation() {
        let mut config = stage_config(0.2);
        config.semantic.embeddings_model = "text-embedding-3-small".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::MissingField(_))
        ));
    }
}
