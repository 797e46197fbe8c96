//! Typed engine errors
//!
//! Every measurement failure is surfaced to the caller; nothing is
//! collapsed into a zero or placeholder answer.

use thiserror::Error;

/// Errors produced by the measurement engine and its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// Image exceeds the configured pixel budget
    #[error("image has {pixels} pixels, exceeding the limit of {limit}")]
    ResourceLimit { pixels: u64, limit: u64 },

    /// No ink of the requested color/shape was found
    #[error("{0}")]
    NotFound(String),

    /// Boundary graph or segment decomposition produced nothing usable
    #[error("{0}")]
    Geometry(String),

    /// No segment obtained a usable unit label
    #[error("{0}")]
    Calibration(String),

    /// OCR or image capability is not installed
    #[error("capability unavailable: {0}")]
    RecognitionUnavailable(String),

    /// An installed OCR backend failed while recognizing
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// Image decode/encode failure
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Caller supplied arguments the engine cannot use
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable kind name reported in tool failure results
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ResourceLimit { .. } => "ResourceLimitError",
            EngineError::NotFound(_) => "NotFoundError",
            EngineError::Geometry(_) => "GeometryError",
            EngineError::Calibration(_) => "CalibrationError",
            EngineError::RecognitionUnavailable(_) => "RecognitionUnavailableError",
            EngineError::Recognition(_) => "RecognitionError",
            EngineError::Image(_) => "ImageError",
            EngineError::InvalidInput(_) => "InvalidInputError",
            EngineError::Io(_) => "IoError",
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
