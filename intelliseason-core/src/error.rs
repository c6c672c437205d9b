//! Error types for the intelliseason-core crate.

use thiserror::Error;

/// Convenience alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error type for loading, cleaning, forecasting and validation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Column not found: {column}")]
    ColumnNotFound { column: String },

    #[error("Empty dataset after {stage}")]
    EmptyDataset { stage: String },

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Column '{column}' is not numeric (row {row}: {value})")]
    NonNumericColumn {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Invalid date in column '{column}' at row {row}: {value}")]
    InvalidDate {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
        }
    }

    pub fn empty_dataset(stage: impl Into<String>) -> Self {
        Self::EmptyDataset {
            stage: stage.into(),
        }
    }

    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateInput(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used by the HTTP gateway.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            Self::EmptyDataset { .. } => "EMPTY_DATASET",
            Self::DegenerateInput(_) => "DEGENERATE_INPUT",
            Self::NonNumericColumn { .. } => "NON_NUMERIC_COLUMN",
            Self::InvalidDate { .. } => "INVALID_DATE",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::Numerical(_) => "NUMERICAL_ERROR",
            Self::Dataset(_) => "DATASET_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Csv(_) => "CSV_ERROR",
            Self::Serde(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error was caused by the caller's data or parameters
    /// rather than by the environment.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Serde(_) | Self::Config(_))
    }
}
