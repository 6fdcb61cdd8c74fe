//! # AppError
//!
//! Centralized error handling for the Rusty-Chat mediator.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

/// The primary error type for all rc-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Resource not found (e.g., Report, Connection)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., missing ip, unknown sanction type)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing or mismatched admin credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller's IP holds an active ban
    #[error("banned: {0}")]
    Banned(String),

    /// Infrastructure failure (e.g., snapshot file unwritable)
    #[error("internal service error: {0}")]
    Internal(String),
}

/// A specialized Result type for Rusty-Chat logic.
pub type Result<T> = std::result::Result<T, AppError>;
