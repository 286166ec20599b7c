use std::{fmt, io};

use thiserror::Error;

/// Failures while reading, writing or validating coverage tables.
///
/// Apart from I/O failures, every variant means the data does not have
/// the shape this crate expects and must not be processed further.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column {column}")]
    MissingColumn { column: String },
    #[error("invalid TEST_DATE value: {value:?}")]
    InvalidDate { value: String },
    #[error("inconsistent row for {group} on {test_date}: {details}")]
    Inconsistent {
        group: String,
        test_date: String,
        details: String,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type CoverageResult<T> = Result<T, CoverageError>;

impl CoverageError {
    pub fn inconsistent(
        group: impl Into<String>,
        test_date: impl fmt::Display,
        details: impl fmt::Display,
    ) -> Self {
        Self::Inconsistent {
            group: group.into(),
            test_date: test_date.to_string(),
            details: details.to_string(),
        }
    }

    /// True when the table cannot be trusted, as opposed to a plain I/O failure.
    pub fn is_shape_failure(&self) -> bool {
        match self {
            Self::Io(_) => false,
            Self::Csv(err) => !matches!(err.kind(), csv::ErrorKind::Io(_)),
            Self::MissingColumn { .. } | Self::InvalidDate { .. } | Self::Inconsistent { .. } => {
                true
            }
        }
    }
}
