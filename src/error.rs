use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Record {position} cannot be processed: {message}")]
    Data { position: usize, message: String },

    #[error("{stage} collaborator failed: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Stage {kind} (position {position}) failed: {source}")]
    Stage {
        kind: &'static str,
        position: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Job exceeded deadline of {0}s")]
    Timeout(u64),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl PipelineError {
    /// Wraps any error into a Collaborator error carrying the stage name.
    pub fn collaborator(stage: &'static str, source: PipelineError) -> Self {
        PipelineError::Collaborator {
            stage,
            source: Box::new(source),
        }
    }

    /// Attaches the stage identity and position to an error bubbling out of `apply`.
    pub fn in_stage(self, kind: &'static str, position: usize) -> Self {
        PipelineError::Stage {
            kind,
            position,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
