//! Error types for template merge operations.
//!
//! Every failure surfaced by the engine maps onto one of a small set of
//! categories. The pipeline reports the category together with the stage that
//! was running when the failure happened.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Error types for merge operations.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The input is not a readable ZIP/OPC container, or one of its parts
    /// cannot be decompressed or parsed.
    #[error("Container corrupt: {0}")]
    ContainerCorrupt(String),

    /// A structural part the document needs is absent.
    #[error("Part missing: {0}")]
    PartMissing(String),

    /// A placeholder occurrence cannot be merged safely.
    #[error("Cannot render {part}: {message}")]
    Render { part: String, message: String },

    /// The custom properties part could not be rewritten.
    #[error("Property write failed: {0}")]
    PropertyWrite(String),

    /// The merge options were rejected before any work started.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Anything raised by lower layers that has no better category.
    #[error("{0}")]
    Unknown(String),
}

impl MergeError {
    /// Build a render error for the given part.
    pub fn render(part: impl Into<String>, message: impl Into<String>) -> Self {
        MergeError::Render {
            part: part.into(),
            message: message.into(),
        }
    }

    /// The category of this error, as carried in error responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MergeError::ContainerCorrupt(_) => ErrorKind::ContainerCorrupt,
            MergeError::PartMissing(_) => ErrorKind::PartMissing,
            MergeError::Render { .. } => ErrorKind::RenderError,
            MergeError::PropertyWrite(_) => ErrorKind::PropertyWriteError,
            MergeError::InvalidOptions(_) => ErrorKind::InvalidOptions,
            MergeError::Unknown(_) => ErrorKind::UnknownError,
        }
    }
}

/// Error category reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContainerCorrupt,
    PartMissing,
    RenderError,
    PropertyWriteError,
    InvalidOptions,
    UnknownError,
}

impl From<zip::result::ZipError> for MergeError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::FileNotFound => {
                MergeError::PartMissing("entry not found in archive".to_string())
            },
            other => MergeError::ContainerCorrupt(other.to_string()),
        }
    }
}

impl From<quick_xml::Error> for MergeError {
    fn from(err: quick_xml::Error) -> Self {
        MergeError::ContainerCorrupt(format!("XML error: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for MergeError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        MergeError::ContainerCorrupt(format!("XML attribute error: {}", err))
    }
}

impl From<quick_xml::encoding::EncodingError> for MergeError {
    fn from(err: quick_xml::encoding::EncodingError) -> Self {
        MergeError::ContainerCorrupt(format!("XML encoding error: {}", err))
    }
}

impl From<quick_xml::escape::EscapeError> for MergeError {
    fn from(err: quick_xml::escape::EscapeError) -> Self {
        MergeError::ContainerCorrupt(format!("XML escape error: {}", err))
    }
}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        MergeError::Unknown(format!("IO error: {}", err))
    }
}
