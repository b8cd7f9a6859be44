//! Unified error handling for the finsight pipeline
//!
//! This module provides a centralized error type that encompasses all possible
//! errors that can occur throughout the workflow engine.

use std::fmt;

/// Main error type for the finsight system
#[derive(Debug)]
pub enum FinsightError {
    /// Configuration-related errors (numeric out of range, empty required field)
    Config {
        /// Error message
        message: String,
    },

    /// LLM output not parseable as the required structure
    Parse {
        /// Error message
        message: String,
    },

    /// SQL failed dialect or read-only validation
    Validation {
        /// Error message
        message: String,
    },

    /// Missing template variable
    Template {
        /// Name of the missing placeholder
        variable: String,
    },

    /// Network or non-2xx response from the LLM backend
    Llm {
        /// Error message
        message: String,
    },

    /// Database connection or permission failure
    Db {
        /// Error message
        message: String,
    },

    /// Pool acquisition or query deadline exceeded
    DbTimeout {
        /// Operation that timed out
        operation: String,
    },

    /// Retry budget depleted on a recoverable failure
    BudgetExhausted {
        /// Stage that exhausted its budget
        stage: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Cooperative cancellation observed
    Cancelled,

    /// Resource not found errors
    NotFound {
        /// Resource type
        resource: String,
        /// Resource identifier
        id: String,
    },

    /// I/O errors from file operations
    Io(std::io::Error),

    /// JSON serialization errors
    Json(serde_json::Error),

    /// HTTP request errors
    Http(reqwest::Error),
}

impl fmt::Display for FinsightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinsightError::Config { message } => {
                write!(
                    f,
                    "Configuration error: {message}. \
                     Solution: check the config file or start from FinsightConfig::default()"
                )
            },
            FinsightError::Parse { message } => {
                write!(f, "Parse error: {message}")
            },
            FinsightError::Validation { message } => {
                write!(f, "SQL validation error: {message}")
            },
            FinsightError::Template { variable } => {
                write!(f, "Template error: missing variable '{variable}'")
            },
            FinsightError::Llm { message } => {
                write!(
                    f,
                    "LLM error: {message}. \
                     Solution: check that the model backend is reachable and the model is pulled"
                )
            },
            FinsightError::Db { message } => {
                write!(
                    f,
                    "Database error: {message}. \
                     Solution: check the connection string and read permissions"
                )
            },
            FinsightError::DbTimeout { operation } => {
                write!(f, "Database timeout during {operation}")
            },
            FinsightError::BudgetExhausted { stage, attempts } => {
                write!(f, "Retry budget exhausted in {stage} after {attempts} attempts")
            },
            FinsightError::Cancelled => {
                write!(f, "Invocation cancelled")
            },
            FinsightError::NotFound { resource, id } => {
                write!(f, "{resource} not found: {id}")
            },
            FinsightError::Io(err) => {
                write!(f, "I/O error: {err}")
            },
            FinsightError::Json(err) => {
                write!(f, "JSON serialization error: {err}")
            },
            FinsightError::Http(err) => {
                write!(f, "HTTP request error: {err}")
            },
        }
    }
}

impl std::error::Error for FinsightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FinsightError::Io(err) => Some(err),
            FinsightError::Json(err) => Some(err),
            FinsightError::Http(err) => Some(err),
            _ => None,
        }
    }
}

// Automatic conversions from common error types
impl From<std::io::Error> for FinsightError {
    fn from(err: std::io::Error) -> Self {
        FinsightError::Io(err)
    }
}

impl From<serde_json::Error> for FinsightError {
    fn from(err: serde_json::Error) -> Self {
        FinsightError::Json(err)
    }
}

impl From<reqwest::Error> for FinsightError {
    fn from(err: reqwest::Error) -> Self {
        FinsightError::Http(err)
    }
}

impl From<regex::Error> for FinsightError {
    fn from(err: regex::Error) -> Self {
        FinsightError::Parse {
            message: format!("Regex error: {err}"),
        }
    }
}

impl From<sqlx::Error> for FinsightError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => FinsightError::DbTimeout {
                operation: "pool acquisition".to_string(),
            },
            other => FinsightError::Db {
                message: other.to_string(),
            },
        }
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, FinsightError>;

/// Creates a configuration error with a message
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::FinsightError::Config {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::FinsightError::Config {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Creates an LLM error with a message
#[macro_export]
macro_rules! llm_error {
    ($msg:expr) => {
        $crate::FinsightError::Llm {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::FinsightError::Llm {
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warning - something unexpected but recoverable
    Warning,
    /// Error - operation failed but the invocation can continue
    Error,
    /// Critical - the invocation cannot proceed
    Critical,
}

impl FinsightError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            FinsightError::Config { .. } => ErrorSeverity::Critical,
            FinsightError::Parse { .. } => ErrorSeverity::Warning,
            FinsightError::Validation { .. } => ErrorSeverity::Warning,
            FinsightError::Template { .. } => ErrorSeverity::Critical,
            FinsightError::Llm { .. } => ErrorSeverity::Warning,
            FinsightError::Db { .. } => ErrorSeverity::Error,
            FinsightError::DbTimeout { .. } => ErrorSeverity::Error,
            FinsightError::BudgetExhausted { .. } => ErrorSeverity::Error,
            FinsightError::Cancelled => ErrorSeverity::Warning,
            FinsightError::NotFound { .. } => ErrorSeverity::Warning,
            FinsightError::Io(_) => ErrorSeverity::Error,
            FinsightError::Json(_) => ErrorSeverity::Error,
            FinsightError::Http(_) => ErrorSeverity::Warning,
        }
    }

    /// Check if this error is recoverable inside a subgraph
    pub fn is_recoverable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Warning)
    }

    /// Get error category for metrics and history entries
    pub fn category(&self) -> &'static str {
        match self {
            FinsightError::Config { .. } => "config_error",
            FinsightError::Parse { .. } => "parse_error",
            FinsightError::Validation { .. } => "validation_error",
            FinsightError::Template { .. } => "template_error",
            FinsightError::Llm { .. } => "llm_error",
            FinsightError::Db { .. } => "db_error",
            FinsightError::DbTimeout { .. } => "db_timeout",
            FinsightError::BudgetExhausted { .. } => "budget_exhausted",
            FinsightError::Cancelled => "cancelled",
            FinsightError::NotFound { .. } => "not_found",
            FinsightError::Io(_) => "io",
            FinsightError::Json(_) => "serialization",
            FinsightError::Http(_) => "http",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FinsightError::Config {
            message: "temperature out of range".to_string(),
        };
        assert!(format!("{error}").starts_with("Configuration error: temperature out of range"));
    }

    #[test]
    fn test_error_macros() {
        let error = config_error!("bad value");
        assert!(matches!(error, FinsightError::Config { .. }));

        let error = llm_error!("backend {} refused", "ollama");
        assert!(matches!(error, FinsightError::Llm { .. }));
    }

    #[test]
    fn test_error_severity() {
        let config_error = FinsightError::Config {
            message: "test".to_string(),
        };
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);
        assert!(!config_error.is_recoverable());

        let parse_error = FinsightError::Parse {
            message: "test".to_string(),
        };
        assert_eq!(parse_error.severity(), ErrorSeverity::Warning);
        assert!(parse_error.is_recoverable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            FinsightError::Template {
                variable: "query".to_string()
            }
            .category(),
            "template_error"
        );
        assert_eq!(FinsightError::Cancelled.category(), "cancelled");
    }
}
