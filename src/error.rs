//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout sqlgate.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `ValidationFailed`: Statement kind not permitted on the requested path (includes `MULTI`)
//! - `PermissionDenied`: Database or schema outside the connection's allowlist
//! - `ConnectionFailed`: Unknown connection, unsupported driver, or handle establishment failure
//! - `QueryFailed`: Statement execution failed at the backend
//! - `EngineError`: Backend metadata/introspection errors
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `ConfigError`: Configuration file errors

use thiserror::Error;

/// Main error type for sqlgate operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlGateError {
    /// Statement blocked by a gate
    #[error("Blocked statement type '{statement_type}': {detail}")]
    ValidationFailed { statement_type: String, detail: String },

    /// Target not permitted by the allowlist (or no policy at all)
    #[error("Permission denied on '{connection}' for target '{target}': {detail}")]
    PermissionDenied { connection: String, target: String, detail: String },

    /// Connection could not be resolved or established
    #[error("Connection '{connection}' failed: {detail}")]
    ConnectionFailed { connection: String, detail: String },

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SqlGateError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by callers.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a gate violation error
    pub fn validation_failed(statement_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ValidationFailed { statement_type: statement_type.into(), detail: detail.into() }
    }

    /// Create an allowlist denial
    pub fn permission_denied(
        connection: impl Into<String>,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            connection: connection.into(),
            target: target.into(),
            detail: detail.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(connection: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConnectionFailed { connection: connection.into(), detail: detail.into() }
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for sqlgate operations
pub type Result<T> = std::result::Result<T, SqlGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SqlGateError::validation_failed("DROP", "x").error_code(), "VALIDATION_FAILED");
        assert_eq!(
            SqlGateError::permission_denied("c", "db", "x").error_code(),
            "PERMISSION_DENIED"
        );
        assert_eq!(SqlGateError::connection_failed("c", "x").error_code(), "CONNECTION_FAILED");
        assert_eq!(SqlGateError::query_failed("test").error_code(), "QUERY_FAILED");
        assert_eq!(SqlGateError::engine_error("mysql", "test").error_code(), "ENGINE_ERROR");
        assert_eq!(SqlGateError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(SqlGateError::config_error("test").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_messages() {
        let err = SqlGateError::validation_failed("MULTI", "Submit one statement at a time.");
        assert_eq!(err.message(), "Blocked statement type 'MULTI': Submit one statement at a time.");

        let err = SqlGateError::permission_denied(
            "warehouse",
            "sales",
            "Database not in allowlist. Allowed: [\"ops\"]",
        );
        assert_eq!(
            err.message(),
            "Permission denied on 'warehouse' for target 'sales': Database not in allowlist. Allowed: [\"ops\"]"
        );

        let err = SqlGateError::connection_failed("nope", "Unknown connection. Available: []");
        assert_eq!(err.message(), "Connection 'nope' failed: Unknown connection. Available: []");
    }
}
