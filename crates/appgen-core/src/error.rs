//! Error types for appgen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("source detection failed: {0}")]
    SourceDetection(String),

    #[error("no build strategy matched source {0}")]
    NoStrategyMatch(String),

    #[error("resolver backend unavailable: {0}")]
    ResolverTransient(String),

    #[error("no match for image {0}")]
    ResolverNoMatch(String),

    #[error("unable to resolve image {0}")]
    Resolution(String),

    #[error("inconsistent pipeline: {0}")]
    PipelineConsistency(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failed: {0}")]
    Encode(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether a resolver chain should move on to its next backend.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Error::ResolverTransient(_) | Error::ResolverNoMatch(_) | Error::Resolution(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
