//! Error types for linkgate
//!
//! One enum covers the whole core so callers can map any failure onto an
//! HTTP status with `status_code()`.

use chrono::{DateTime, Utc};
use hyper::StatusCode;

/// Main error type for linkgate operations
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid token signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed secret hash: {0}")]
    MalformedHash(String),

    #[error("Unsupported hash version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, resets at {reset}")]
    RateLimited { limit: u64, reset: DateTime<Utc> },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// HTTP status a caller should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnsupportedVersion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnsupportedAlgorithm(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by a corrupt stored hash.
    pub fn is_hash_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedHash(_) | Self::UnsupportedVersion(_) | Self::UnsupportedAlgorithm(_)
        )
    }
}

impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for GateError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::RsaFailedSigning
            | ErrorKind::MissingAlgorithm => Self::Crypto(err.to_string()),
            _ => Self::InvalidSignature(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<mongodb::error::Error> for GateError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

impl From<tokio::task::JoinError> for GateError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Result type alias for linkgate operations
pub type Result<T> = std::result::Result<T, GateError>;
