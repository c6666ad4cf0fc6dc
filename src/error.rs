//! Error taxonomy for the extraction pipeline.

use thiserror::Error;

/// Errors raised while receiving, dispatching or running an extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The upload could not be persisted to a temporary file.
    #[error("failed to store upload: {0}")]
    Upload(#[source] std::io::Error),

    /// The method does not accept this kind of document.
    #[error("{0}")]
    UnsupportedFormat(String),

    /// The underlying engine failed (corrupt input, crashed tool, sidecar down).
    #[error("{engine} failed: {message}")]
    Engine { engine: &'static str, message: String },

    /// No extractor is registered under this name.
    #[error("Unknown extraction method: {0}")]
    UnknownMethod(String),
}

impl ExtractError {
    pub fn engine(engine: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Engine {
            engine,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
