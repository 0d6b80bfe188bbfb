//! Error types for the dotprompt pipeline.
//!
//! This module defines a unified error enum that covers every failure
//! category in the workspace: configuration, I/O, document parsing, template
//! registration, rendering, resolver callbacks and the prompt store.

use thiserror::Error;

/// Unified error type for the dotprompt crates.
///
/// All fallible functions return `Result<T, AppError>`.
/// Lookups that merely find nothing are not errors; they return `Ok(None)`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Front matter / document parsing errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Template or partial registration errors
    #[error("Template error: {0}")]
    Template(String),

    /// Rendering errors (unknown partials, helper failures)
    #[error("Render error: {0}")]
    Render(String),

    /// Errors raised by caller-supplied resolvers
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Prompt store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
