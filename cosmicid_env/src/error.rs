//! Error types for the event environment layer.

use thiserror::Error;

/// Errors that can occur while retrieving event data.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A data product the consumer requires is absent from the event
    #[error("Missing data product: {0}")]
    MissingProduct(&'static str),

    /// Reading the event stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event record could not be decoded
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl EnvError {
    /// Creates a missing-product error.
    pub fn missing(product: &'static str) -> Self {
        Self::MissingProduct(product)
    }

    /// Creates a parse error for the given (1-based) line.
    pub fn parse(line: usize, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            line,
            message: message.to_string(),
        }
    }

    /// True if this error means the event lacks a product (the event is
    /// skipped, the job continues).
    pub fn is_missing_product(&self) -> bool {
        matches!(self, Self::MissingProduct(_))
    }
}
