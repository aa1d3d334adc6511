//! Error taxonomy for Pastures.

use tf_runner::TfError;

/// Pastures domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PastureError {
    #[error("application default credentials unavailable: {0}")]
    Auth(String),

    #[error("unable to parse {path}: {reason}")]
    ConfigParse { path: String, reason: String },

    #[error("settings file not found: {0}")]
    SettingsNotFound(String),

    #[error("dependencies missing for stage {stage}: {object} ({reason})")]
    DependenciesMissing {
        stage: String,
        object: String,
        reason: String,
    },

    #[error("terraform error: {0}")]
    Engine(#[from] TfError),

    #[error("failed to write {object}: {reason}")]
    RemoteWrite { object: String, reason: String },

    #[error("stage source not found: {0}")]
    StageSourceMissing(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("{action}: {stage}")]
    StageFailed {
        stage: String,
        action: String,
        #[source]
        source: Box<PastureError>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PastureError {
    /// Wrap `self` with a human-readable stage context such as
    /// "Stage failed to deploy".
    pub fn in_stage(self, stage: &str, action: &str) -> Self {
        PastureError::StageFailed {
            stage: stage.to_string(),
            action: action.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage context.
    pub fn root(&self) -> &PastureError {
        match self {
            PastureError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_config_parse(&self) -> bool {
        matches!(self.root(), PastureError::ConfigParse { .. })
    }
}

/// Result type for Pastures operations.
pub type Result<T> = std::result::Result<T, PastureError>;
