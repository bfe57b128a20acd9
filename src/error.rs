//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.

use thiserror::Error;

/// Main error type for ArgWeaver operations
#[derive(Error, Debug)]
pub enum ArgError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (mismatched popsize count, non-monotone time grid)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed sites/SMC/map lines
    #[error("Format error at line {line}: {message}")]
    Format { line: usize, message: String },

    /// Broken tree or SPR chain. These are bugs, not user errors.
    #[error("Internal error: {message}")]
    Invariant { message: String },

    /// Recoverable numeric failures during sampling (all-`-inf` forward column)
    #[error("Numeric failure: {message}")]
    Numeric { message: String },
}

/// Type alias for Results using ArgError
pub type Result<T> = std::result::Result<T, ArgError>;

impl ArgError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a format error for a given input line
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            line,
            message: message.into(),
        }
    }

    /// Create an invariant-violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Create a numeric-failure error
    pub fn numeric(message: impl Into<String>) -> Self {
        Self::Numeric {
            message: message.into(),
        }
    }
}
