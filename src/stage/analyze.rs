use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Stage, StageKind};
use crate::error::{PipelineError, Result};
use crate::record::RecordBatch;

/// Quality annotation written back onto each record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextQuality {
    pub quality_index: f64,
    pub category: String,
    pub language: String,
}

/// Collaborator that judges one text. Implementations may call out to a
/// classifier service; failures surface as collaborator errors.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<TextQuality>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeConfig {
    pub quality: QualityConfig,
}

impl AnalyzeConfig {
    pub fn validate(&self) -> Result<()> {
        self.quality.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    /// Field whose text is scored.
    pub column: String,
    /// Chat model used by the remote scorer; the built-in heuristic scorer
    /// when unset.
    pub model: Option<String>,
    pub api_base_url: Option<String>,
    /// Transient-failure retries are a stage-local policy, not the
    /// executor's.
    pub max_retries: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            column: "messages".to_string(),
            model: None,
            api_base_url: None,
            max_retries: 2,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.column.is_empty() {
            return Err(PipelineError::MissingField("analyze.quality.column".into()));
        }
        if self.model.is_some() && self.api_base_url.is_none() {
            return Err(PipelineError::MissingField(
                "analyze.quality.api_base_url".into(),
            ));
        }
        Ok(())
    }
}

/// Offline scorer: deterministic lexical heuristics standing in for a
/// classifier. Scores length-bounded vocabulary diversity; category and
/// language are fixed placeholders.
pub struct HeuristicScorer;

#[async_trait]
impl QualityScorer for HeuristicScorer {
    async fn score(&self, text: &str) -> Result<TextQuality> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let distinct: std::collections::HashSet<&str> = words.iter().copied().collect();
        let diversity = if words.is_empty() {
            0.0
        } else {
            distinct.len() as f64 / words.len() as f64
        };
        let length_score = (words.len() as f64 / 50.0).min(1.0);
        Ok(TextQuality {
            quality_index: (0.5 * diversity + 0.5 * length_score).clamp(0.0, 1.0),
            category: "unclassified".to_string(),
            language: "und".to_string(),
        })
    }
}

const SCORER_SYSTEM_PROMPT: &str = "You are a strict data-quality judge. \
For the given text return JSON with fields: quality_index (0-1), \
category (short label), language (ISO code). Return JSON only.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Scorer backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpScorer {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Config(
                "analysis API key is empty; set DATAPREP_API_KEY".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.trim().to_string(),
        })
    }
}

#[async_trait]
impl QualityScorer for HttpScorer {
    async fn score(&self, text: &str) -> Result<TextQuality> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SCORER_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
        };
        let response: ChatResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| PipelineError::Config("scorer returned no choices".to_string()))?;
        Ok(serde_json::from_str(content)?)
    }
}

/// Analyze stage: annotates every record with quality fields. Cardinality
/// is always preserved; scoring failures are retried a bounded number of
/// times, then wrapped as a collaborator error.
pub struct AnalyzeStage {
    config: QualityConfig,
    scorer: Box<dyn QualityScorer>,
}

impl AnalyzeStage {
    pub fn new(config: AnalyzeConfig) -> Result<Self> {
        config.validate()?;
        let quality = config.quality;
        let scorer: Box<dyn QualityScorer> = match (&quality.model, &quality.api_base_url) {
            (Some(model), Some(base_url)) => {
                let api_key = std::env::var("DATAPREP_API_KEY").unwrap_or_default();
                Box::new(HttpScorer::new(base_url, model, &api_key)?)
            }
            _ => Box::new(HeuristicScorer),
        };
        Ok(Self {
            config: quality,
            scorer,
        })
    }

    pub fn with_scorer(config: QualityConfig, scorer: Box<dyn QualityScorer>) -> Self {
        Self { config, scorer }
    }

    async fn score_with_retry(&self, text: &str) -> Result<TextQuality> {
        let mut attempt = 0;
        loop {
            match self.scorer.score(text).await {
                Ok(quality) => return Ok(quality),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "quality scoring failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(PipelineError::collaborator("analyze", e)),
            }
        }
    }
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn kind(&self) -> StageKind {
        StageKind::Analyze
    }

    async fn apply(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let mut annotated = Vec::with_capacity(batch.len());
        for (position, mut record) in batch.into_iter().enumerate() {
            let text = record.require_text(&self.config.column, position)?;
            let quality = self.score_with_retry(text).await?;
            debug!(position, quality = quality.quality_index, "scored record");
            record.set("quality_index", Value::from(quality.quality_index));
            record.set("category", Value::String(quality.category));
            record.set("language", Value::String(quality.language));
            annotated.push(record);
        }
        Ok(annotated)
    }
}
