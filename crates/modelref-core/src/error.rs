//! Error types for the model reference registry.

use crate::models::Category;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for registry operations.
#[derive(Debug, Error)]
pub enum ModelRefError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Primary API returned {status} for {category}")]
    PrimaryApi { category: Category, status: u16 },

    // GitHub errors
    #[error("GitHub error: {message}")]
    GitHub {
        message: String,
        status_code: Option<u16>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Distributed cache errors
    #[error("Redis error: {message}")]
    Redis {
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    // Registry errors
    #[error("Model not found: {model_name} in {category}")]
    ModelNotFound {
        category: Category,
        model_name: String,
    },

    #[error("{backend} does not support {operation}")]
    NotSupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("No metadata recorded for {category} ({format})")]
    MetadataMissing { category: Category, format: String },

    // Configuration errors (fail fast, at construction)
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Audit factory errors
    #[error("No registered handler can process model {model_name} in {category}")]
    NoHandler {
        category: Category,
        model_name: String,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, ModelRefError>;

// Conversion implementations for common error types

impl From<std::io::Error> for ModelRefError {
    fn from(err: std::io::Error) -> Self {
        ModelRefError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ModelRefError {
    fn from(err: serde_json::Error) -> Self {
        ModelRefError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<redis::RedisError> for ModelRefError {
    fn from(err: redis::RedisError) -> Self {
        ModelRefError::Redis {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ModelRefError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelRefError::Timeout(std::time::Duration::from_secs(0))
        } else {
            let cause = std::error::Error::source(&err).map(|s| s.to_string());
            ModelRefError::Network {
                message: err.to_string(),
                cause,
            }
        }
    }
}

impl ModelRefError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ModelRefError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelRefError::Network { .. } | ModelRefError::Timeout(_) => true,
            // 5xx from the primary is transient; 4xx is not
            ModelRefError::PrimaryApi { status, .. } => *status >= 500,
            ModelRefError::Redis { source, .. } => source
                .as_ref()
                .map(|e| e.is_io_error() || e.is_connection_dropped() || e.is_timeout())
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelRefError::ModelNotFound {
            category: Category::ImageGeneration,
            model_name: "Deliberate".into(),
        };
        assert_eq!(
            err.to_string(),
            "Model not found: Deliberate in image_generation"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ModelRefError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(ModelRefError::PrimaryApi {
            category: Category::Clip,
            status: 503
        }
        .is_retryable());
        assert!(!ModelRefError::PrimaryApi {
            category: Category::Clip,
            status: 404
        }
        .is_retryable());
        assert!(!ModelRefError::Config {
            message: "bad mode".into()
        }
        .is_retryable());
    }
}
