//! Polymorphic pipeline stages. Every variant implements the same `apply`
//! contract and is constructed, fully validated, from its config block
//! before the executor runs anything.

pub mod analyze;
pub mod dedup;
pub mod format;
pub mod load;
pub mod save;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::record::RecordBatch;

pub use analyze::{AnalyzeConfig, AnalyzeStage, QualityScorer, TextQuality};
pub use dedup::{DedupStage, DedupStageConfig, SemanticDedupConfig};
pub use format::{FormatConfig, FormatStage, MergerConfig};
pub use load::{LoadConfig, LoadStage, LocalFileConfig, RecordSource};
pub use save::{FileType, SaveConfig, SaveStage};

/// The fixed set of stage kinds. Job-file keys map onto this enum at parse
/// time; an unknown key is a configuration error, never a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Load,
    Format,
    Deduplicate,
    Analyze,
    Save,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Load => "load",
            StageKind::Format => "format",
            StageKind::Deduplicate => "deduplicate",
            StageKind::Analyze => "analyze",
            StageKind::Save => "save",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "load" => Some(StageKind::Load),
            "format" => Some(StageKind::Format),
            "deduplicate" => Some(StageKind::Deduplicate),
            "analyze" => Some(StageKind::Analyze),
            "save" => Some(StageKind::Save),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated stage configuration from a job file, in declared order.
#[derive(Debug, Clone)]
pub enum StageSpec {
    Load(LoadConfig),
    Format(FormatConfig),
    Deduplicate(DedupStageConfig),
    Analyze(AnalyzeConfig),
    Save(SaveConfig),
}

impl StageSpec {
    pub fn kind(&self) -> StageKind {
        match self {
            StageSpec::Load(_) => StageKind::Load,
            StageSpec::Format(_) => StageKind::Format,
            StageSpec::Deduplicate(_) => StageKind::Deduplicate,
            StageSpec::Analyze(_) => StageKind::Analyze,
            StageSpec::Save(_) => StageKind::Save,
        }
    }

    /// Parses one top-level job-file entry. Unknown keys fail naming the
    /// offending key; each config validates itself here, never in `apply`.
    pub fn from_key_value(key: &str, value: serde_json::Value) -> Result<Self> {
        let kind = StageKind::from_key(key)
            .ok_or_else(|| PipelineError::Config(format!("unknown stage key '{key}'")))?;
        let invalid =
            |e: serde_json::Error| PipelineError::Config(format!("invalid '{key}' config: {e}"));
        let spec = match kind {
            StageKind::Load => {
                StageSpec::Load(serde_json::from_value::<LoadConfig>(value).map_err(invalid)?)
            }
            StageKind::Format => {
                StageSpec::Format(serde_json::from_value::<FormatConfig>(value).map_err(invalid)?)
            }
            StageKind::Deduplicate => StageSpec::Deduplicate(
                serde_json::from_value::<DedupStageConfig>(value).map_err(invalid)?,
            ),
            StageKind::Analyze => {
                StageSpec::Analyze(serde_json::from_value::<AnalyzeConfig>(value).map_err(invalid)?)
            }
            StageKind::Save => {
                StageSpec::Save(serde_json::from_value::<SaveConfig>(value).map_err(invalid)?)
            }
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StageSpec::Load(c) => c.validate(),
            StageSpec::Format(c) => c.validate(),
            StageSpec::Deduplicate(c) => c.validate(),
            StageSpec::Analyze(c) => c.validate(),
            StageSpec::Save(c) => c.validate(),
        }
    }
}

/// Contract every stage variant implements: take ownership of the batch,
/// return the transformed batch.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn apply(&self, batch: RecordBatch) -> Result<RecordBatch>;
}

/// Registry constructor: resolves a validated spec into a runnable stage.
pub fn build_stage(spec: &StageSpec) -> Result<Box<dyn Stage>> {
    Ok(match spec {
        StageSpec::Load(c) => Box::new(LoadStage::new(c.clone())?),
        StageSpec::Format(c) => Box::new(FormatStage::new(c.clone())),
        StageSpec::Deduplicate(c) => Box::new(DedupStage::new(c.clone())?),
        StageSpec::Analyze(c) => Box::new(AnalyzeStage::new(c.clone())?),
        StageSpec::Save(c) => Box::new(SaveStage::new(c.clone())),
    })
}
