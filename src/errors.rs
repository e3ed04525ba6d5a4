use thiserror::Error;

use crate::queries::descriptor::OperationKind;

pub type QueryResult<T> = Result<T, QueryError>;

/// Terminal failures of a single query invocation. None of these are
/// retried: the only non-deterministic part of the pipeline is the noise
/// draw, and resampling noise is not a recovery strategy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Required request field absent or empty.
    #[error("{0}")]
    MissingInput(&'static str),

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error(
        "Invalid bounds for column '{column}': lower {lower} > upper {upper}"
    )]
    InvalidBounds {
        column: String,
        lower: f64,
        upper: f64,
    },

    #[error("No numeric values found in column '{0}'")]
    NoNumericData(String),

    #[error("{operation} is not supported by the {mechanism} mechanism")]
    UnsupportedOperationForMechanism {
        operation: OperationKind,
        mechanism: &'static str,
    },

    #[error("Invalid privacy budget: {0}")]
    InvalidBudget(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Encryption failure: {0}")]
    Encryption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Variant name, reported as `error_type` in failure envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::MissingInput(_) => "MissingInput",
            QueryError::MalformedQuery(_) => "MalformedQuery",
            QueryError::ColumnNotFound(_) => "ColumnNotFound",
            QueryError::InvalidBounds { .. } => "InvalidBounds",
            QueryError::NoNumericData(_) => "NoNumericData",
            QueryError::UnsupportedOperationForMechanism { .. } => {
                "UnsupportedOperationForMechanism"
            }
            QueryError::InvalidBudget(_) => "InvalidBudget",
            QueryError::InvalidDataset(_) => "InvalidDataset",
            QueryError::Encryption(_) => "Encryption",
            QueryError::Internal(_) => "Internal",
        }
    }
}
