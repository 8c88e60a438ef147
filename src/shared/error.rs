use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug)]
pub enum AppError {
    Network(String),
    Storage(String),
    NotFound(String),
    InvalidInput(String),
    ValidationError(String),
    Conflict(String),
    ServerRejection(String),
    Timeout(String),
    Unauthorized(String),
    ConfigurationError(String),
    SerializationError(String),
    DeserializationError(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Network(msg) => write!(f, "Network error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServerRejection(msg) => write!(f, "Server rejected request: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            AppError::DeserializationError(err.to_string())
        } else {
            AppError::SerializationError(err.to_string())
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Network(err.to_string())
        }
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Internal(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Terminal failure of a queued mutation or remote call. Errors cross async
/// boundaries as values of this type, never as panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("Another change to {0} is still in flight")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    ServerRejection {
        status: Option<u16>,
        message: String,
    },

    #[error("No response after {0:?}")]
    Timeout(Duration),

    #[error("{0} is no longer in the store")]
    Missing(String),

    #[error("Mutation worker stopped before reporting a result")]
    Detached,
}

pub const GENERIC_REJECTION_MESSAGE: &str = "The server rejected the request";

impl MutationError {
    pub fn rejection(status: Option<u16>, message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_REJECTION_MESSAGE.to_string());
        MutationError::ServerRejection { status, message }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationError::Network(_) | MutationError::Timeout(_))
    }
}

impl From<reqwest::Error> for MutationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MutationError::Network(format!("request timed out: {err}"))
        } else {
            MutationError::Network(err.to_string())
        }
    }
}

impl From<MutationError> for AppError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Conflict(msg) => AppError::Conflict(msg),
            MutationError::Network(msg) => AppError::Network(msg),
            MutationError::ServerRejection { message, .. } => AppError::ServerRejection(message),
            MutationError::Timeout(after) => AppError::Timeout(format!("{after:?}")),
            MutationError::Missing(msg) => AppError::NotFound(msg),
            MutationError::Detached => AppError::Internal(MutationError::Detached.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
