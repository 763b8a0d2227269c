//! Stage Trait: single contract for every pipeline stage
use async_trait::async_trait;

use crate::context::PipelineState;
use crate::error::GeolocError;

/// A stage takes ownership of the state and hands back the state it produced.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique stage id (ex: "synthesize.spatial.v1")
    fn id(&self) -> &'static str;

    /// Whether output depends only on input (default: true)
    fn deterministic(&self) -> bool {
        true
    }

    async fn run(&self, state: PipelineState) -> Result<PipelineState, StageError>;
}

#[derive(Debug, Clone)]
pub enum StageError {
    ValidationFailed(String),
    ExecutionFailed(String),
    MissingInput(String),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "STAGE/VALIDATION: {}", msg),
            Self::ExecutionFailed(msg) => write!(f, "STAGE/EXEC: {}", msg),
            Self::MissingInput(msg) => write!(f, "STAGE/INPUT: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl From<StageError> for GeolocError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::MissingInput(msg) => GeolocError::MissingInput(msg),
            other => GeolocError::Stage(other.to_string()),
        }
    }
}
