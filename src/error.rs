//! Error types shared by the dataset, label and model layers.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for results returned by the classification pipeline.
pub type Result<T> = std::result::Result<T, ClassifierError>;

#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Filesystem access failed while walking a dataset split
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Expected split directory is absent
    #[error("dataset directory not found: {0:?}")]
    MissingDirectory(PathBuf),

    /// A split produced no samples
    #[error("{split} split contains no audio samples")]
    EmptySplit { split: String },

    /// Test data carries a label the encoder was never fitted on
    #[error("label {0:?} was not seen during fitting")]
    UnseenLabel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A numerical routine could not produce a usable result
    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl ClassifierError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical(message.into())
    }
}
