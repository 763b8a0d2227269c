//! Unified Error Model
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeolocError {
    /// Classifier answered outside the two known labels
    #[error("INTENT/AMBIGUOUS: {0}")]
    ClassificationAmbiguous(String),

    /// Required run input absent; aborts the run
    #[error("INPUT/MISSING: {0}")]
    MissingInput(String),

    #[error("COLLAB/{collaborator}: {message}")]
    CollaboratorFailure {
        collaborator: String,
        message: String,
    },

    #[error("STAGE/{0}")]
    Stage(String),

    #[error("CONFIG/{0}")]
    Config(String),

    #[error("TEMPLATE/{0}")]
    Template(String),

    #[error("SERIALIZE/{0}")]
    Serialize(String),
}

impl GeolocError {
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorFailure {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Structural failures end the run; everything else is absorbed by the
    /// stage that hit it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ClassificationAmbiguous(_) | Self::CollaboratorFailure { .. }
        )
    }
}

impl From<serde_json::Error> for GeolocError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}
