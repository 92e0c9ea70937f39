//! Error types for gridwindow.
//!
//! Only [`DatasetError::MissingData`] is ever recovered from, and only while
//! probing sample validity. Everything else reaching the assembler or the
//! collator is fatal.

use thiserror::Error;

/// Result type alias for gridwindow operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing data for {parameter} at {timestamp}: {detail}")]
    MissingData {
        parameter: String,
        timestamp: String,
        detail: String,
    },

    #[error("Contract violation{}: {message} (expected {expected}, got {actual})",
        context_suffix(.parameter, .timestamp))]
    ContractViolation {
        message: String,
        parameter: Option<String>,
        timestamp: Option<String>,
        expected: String,
        actual: String,
    },

    #[error("Dataset {name} not found in registry, available datasets are: {available:?}")]
    DatasetLookup { name: String, available: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("NPY read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("NPY write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
}

fn context_suffix(parameter: &Option<String>, timestamp: &Option<String>) -> String {
    let mut suffix = String::new();
    if let Some(p) = parameter {
        suffix.push_str(&format!(" for {}", p));
    }
    if let Some(t) = timestamp {
        suffix.push_str(&format!(" at {}", t));
    }
    suffix
}

impl DatasetError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn missing_data(
        parameter: impl Into<String>,
        timestamp: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::MissingData {
            parameter: parameter.into(),
            timestamp: timestamp.into(),
            detail: detail.into(),
        }
    }

    /// A fetch failed for a sample that had already passed its validity check.
    pub fn fetch_after_validation(
        parameter: impl Into<String>,
        timestamp: impl Into<String>,
        source: &DatasetError,
    ) -> Self {
        Self::ContractViolation {
            message: format!("fetch failed after validity was confirmed: {}", source),
            parameter: Some(parameter.into()),
            timestamp: Some(timestamp.into()),
            expected: "readable data".to_string(),
            actual: "fetch error".to_string(),
        }
    }

    pub fn axis_mismatch(context: impl Into<String>, expected: &[String], actual: &[String]) -> Self {
        Self::ContractViolation {
            message: format!("{}: dimension names differ", context.into()),
            parameter: None,
            timestamp: None,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    pub fn feature_mismatch(context: impl Into<String>, expected: &[String], actual: &[String]) -> Self {
        Self::ContractViolation {
            message: format!("{}: feature names differ", context.into()),
            parameter: None,
            timestamp: None,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ContractViolation {
            message: format!("{}: shapes differ", context.into()),
            parameter: None,
            timestamp: None,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Attach a parameter / timestamp to a contract violation that lacks them.
    pub fn with_context(self, parameter: &str, timestamp: &str) -> Self {
        match self {
            Self::ContractViolation {
                message,
                parameter: p,
                timestamp: t,
                expected,
                actual,
            } => Self::ContractViolation {
                message,
                parameter: p.or_else(|| Some(parameter.to_string())),
                timestamp: t.or_else(|| Some(timestamp.to_string())),
                expected,
                actual,
            },
            other => other,
        }
    }

    /// True only for errors the validity prober may treat as "sample invalid".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingData { .. })
    }
}
