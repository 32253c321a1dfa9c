//! Error types for Tessella.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Name the operation that failed and the precondition it violated
//! - Separate build-time failures from generate-time failures
//! - Support error chaining for context

use crate::core::rect::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for Tessella.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum TessellaError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while building or evaluating a pipeline.
///
/// Every variant carries the nickname of the operation that raised it, so
/// a message reads like `reduceh: reduce factor should be >= 1.0`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("{op}: bad dimensions")]
    BadDimensions { op: String },

    #[error("{op}: {message}")]
    BadParameter { op: String, message: String },

    #[error("{op}: bad mask element ({value:.6} should be 0, 128 or 255)")]
    BadMaskElement { op: String, value: f64 },

    #[error("{op}: reduce factor too large")]
    ReduceFactorTooLarge { op: String, n_point: usize },

    #[error("{op}: image has shrunk to nothing")]
    ShrunkToNothing { op: String },

    #[error("{op}: vector must have 1 or {bands} elements")]
    BadVector { op: String, bands: usize },

    #[error("{op}: images must match in format and bands")]
    Mismatch { op: String },

    #[error("{op}: unsupported format {format}")]
    UnsupportedFormat { op: String, format: String },

    #[error("{op}: no text to render")]
    NoText { op: String },

    #[error("{op}: invalid markup in text ({reason})")]
    InvalidMarkup { op: String, reason: String },

    #[error("region: {want:?} lies outside the {width}x{height} image")]
    OutOfBounds { want: Rect, width: i32, height: i32 },

    #[error("{op}: generate failed: {message}")]
    Generate { op: String, message: String },

    #[error("out of memory: need {required} bytes, have {available} bytes")]
    OutOfMemory { required: usize, available: usize },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from loading and validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to read configuration from {path}: {error}")]
    Read { path: String, error: std::io::Error },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

// ============================================================================
// Error Utilities
// ============================================================================

impl PipelineError {
    /// Shorthand for a parameter error.
    pub fn bad_parameter(op: &str, message: impl Into<String>) -> Self {
        PipelineError::BadParameter {
            op: op.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a generate-time failure.
    pub fn generate(op: &str, message: impl Into<String>) -> Self {
        PipelineError::Generate {
            op: op.to_string(),
            message: message.into(),
        }
    }

    /// The nickname of the operation that raised this error, if any.
    pub fn op(&self) -> Option<&str> {
        match self {
            PipelineError::BadDimensions { op }
            | PipelineError::BadParameter { op, .. }
            | PipelineError::BadMaskElement { op, .. }
            | PipelineError::ReduceFactorTooLarge { op, .. }
            | PipelineError::ShrunkToNothing { op }
            | PipelineError::BadVector { op, .. }
            | PipelineError::Mismatch { op }
            | PipelineError::UnsupportedFormat { op, .. }
            | PipelineError::NoText { op }
            | PipelineError::InvalidMarkup { op, .. }
            | PipelineError::Generate { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Check if this is a build-time precondition violation.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::BadDimensions { .. }
                | PipelineError::BadParameter { .. }
                | PipelineError::BadMaskElement { .. }
                | PipelineError::ReduceFactorTooLarge { .. }
                | PipelineError::ShrunkToNothing { .. }
                | PipelineError::BadVector { .. }
                | PipelineError::Mismatch { .. }
                | PipelineError::UnsupportedFormat { .. }
                | PipelineError::NoText { .. }
                | PipelineError::InvalidMarkup { .. }
        )
    }

    /// Check if a caller could reasonably retry with other parameters.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PipelineError::OutOfMemory { .. } | PipelineError::Cancelled | PipelineError::Internal(_)
        )
    }
}

/// Result type alias for Tessella operations.
pub type TessellaResult<T> = Result<T, TessellaError>;

/// Result type alias for pipeline build and evaluation.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;
