//! Error types for Tether
//!
//! One crate-wide error enum. Every variant maps to an HTTP status and a
//! retryability hint so the read API and the batch job can share it.

use hyper::StatusCode;
use mongodb::error::ErrorKind;

/// Main error type for Tether operations
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Staff not found: {0}")]
    StaffNotFound(String),

    /// The backing store cannot be reached at all
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store read or write exceeded its deadline
    #[error("Store timeout: {0}")]
    StoreTimeout(String),

    /// One side of a dual write landed, the other did not
    #[error("Partial dual write for staff {staff_id} / client {client_id}: {reason}")]
    PartialDualWrite {
        staff_id: String,
        client_id: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ClientNotFound(_) => StatusCode::NOT_FOUND,
            Self::StaffNotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PartialDualWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Parse(_) => StatusCode::BAD_GATEWAY,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ClientNotFound(_) => "CLIENT_NOT_FOUND",
            Self::StaffNotFound(_) => "STAFF_NOT_FOUND",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::StoreTimeout(_) => "STORE_TIMEOUT",
            Self::PartialDualWrite { .. } => "PARTIAL_DUAL_WRITE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::StoreTimeout(_))
    }

    /// Errors that end a batch run instead of being recorded per record
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<mongodb::error::Error> for TetherError {
    fn from(err: mongodb::error::Error) -> Self {
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. } => Self::StoreUnavailable(err.to_string()),
            ErrorKind::BsonDeserialization(_) => Self::Parse(err.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<bson::oid::Error> for TetherError {
    fn from(err: bson::oid::Error) -> Self {
        Self::BadRequest(format!("Invalid id: {}", err))
    }
}

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TetherError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for TetherError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::StoreTimeout(err.to_string())
        } else if err.is_connect() {
            Self::StoreUnavailable(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
