//! Error types for the log analysis pipeline.
//!
//! Parsing and reduction failures are fatal to the operation that hit them:
//! no partial report is ever produced from a log that failed to parse.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing consumer logs and building distributions.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// I/O error while reading a log or CDF file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line is missing fields required by its tag, or a field is not a number
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A timestamp conversion was requested before any `CPS` record was seen
    #[error("clock calibration missing: line {line} needs a CPS record before it")]
    CalibrationMissing { line: usize },

    /// A distribution or summary was requested over zero samples
    #[error("cannot build a distribution from an empty sample set")]
    EmptyInput,

    /// A CDF file could not be read back
    #[error("malformed CDF file {}: line {line}: {reason}", path.display())]
    MalformedCdf {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl AnalysisError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        AnalysisError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
