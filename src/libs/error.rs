use crate::libs::phylo::TreeError;
use thiserror::Error;

/// Every failure the simulation library can report.
///
/// All variants except `Io` describe bad input or misuse and are raised
/// before any random draw is made whenever the check can be done eagerly.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Incompatible options: {0}")]
    IncompatibleOptions(String),
    #[error("Model not initialized: {0}")]
    ModelNotInitialized(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Malformed tree: {0}")]
    MalformedTree(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TreeError> for SimError {
    fn from(e: TreeError) -> Self {
        SimError::MalformedTree(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
