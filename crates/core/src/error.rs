//! Unified error types for the session mesh.
//!
//! Error codes surfaced at the request boundary:
//! - SESSION_001-003: Session lookup and routing outcomes
//! - VALID_001: Malformed requests
//! - STORE_001: Shared store failures
//! - FORWARD_001-003: Owner-node forwarding failures

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Session routing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorCode {
    /// SESSION_001: Unknown or expired session
    NotFound,
    /// SESSION_002: Session exists under a different transport kind
    TransportMismatch,
    /// SESSION_003: Session cannot be served here; client must start over
    ReestablishRequired,
}

impl SessionErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "SESSION_001",
            Self::TransportMismatch => "SESSION_002",
            Self::ReestablishRequired => "SESSION_003",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::TransportMismatch => 400,
            Self::ReestablishRequired => 410,
        }
    }
}

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// VALID_001: Malformed request
    MalformedRequest,
}

impl ValidationErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest => "VALID_001",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        400
    }
}

/// Shared store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// STORE_001: Store operation failed (network, timeout, protocol)
    Unavailable,
}

impl StoreErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "STORE_001",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        503
    }
}

/// Forwarding error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorCode {
    /// FORWARD_001: Owner node did not answer
    Unreachable,
    /// FORWARD_002: Owner node has no known address
    UnknownOwner,
    /// FORWARD_003: Request was already forwarded once
    LoopDetected,
}

impl ForwardErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable => "FORWARD_001",
            Self::UnknownOwner => "FORWARD_002",
            Self::LoopDetected => "FORWARD_003",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unreachable | Self::UnknownOwner => 502,
            Self::LoopDetected => 508,
        }
    }
}

/// Unified error type for the session mesh.
#[derive(Debug, Error)]
pub enum Error {
    /// Session routing outcome with code.
    #[error("[{code}] {message}")]
    Session {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// Validation error with code.
    #[error("[{code}] {message}")]
    Validation {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// Shared store failure with code.
    #[error("[{code}] {message}")]
    Store {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    /// Forwarding failure with code.
    #[error("[{code}] {message}")]
    Forward {
        code: &'static str,
        message: String,
        http_status: u16,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a session routing error.
    pub fn session(code: SessionErrorCode, msg: impl Into<String>) -> Self {
        Self::Session {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn not_found(session_id: &str) -> Self {
        Self::session(
            SessionErrorCode::NotFound,
            format!("session {} not found", session_id),
        )
    }

    pub fn transport_mismatch(msg: impl Into<String>) -> Self {
        Self::session(SessionErrorCode::TransportMismatch, msg)
    }

    pub fn reestablish(session_id: &str) -> Self {
        Self::session(
            SessionErrorCode::ReestablishRequired,
            format!(
                "session {} is not served by this node; open a new session",
                session_id
            ),
        )
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        let code = ValidationErrorCode::MalformedRequest;
        Self::Validation {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        let code = StoreErrorCode::Unavailable;
        Self::Store {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn forward(code: ForwardErrorCode, msg: impl Into<String>) -> Self {
        Self::Forward {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
        }
    }

    pub fn transport_closed(session_id: &str) -> Self {
        Self::TransportClosed(session_id.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Session { http_status, .. } => *http_status,
            Self::Validation { http_status, .. } => *http_status,
            Self::Store { http_status, .. } => *http_status,
            Self::Forward { http_status, .. } => *http_status,
            Self::Serialization(_) => 400,
            Self::TransportClosed(_) => 410,
            Self::Internal(_) => 500,
        }
    }

    /// Get the error code if this is a coded error.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Session { code, .. } => Some(code),
            Self::Validation { code, .. } => Some(code),
            Self::Store { code, .. } => Some(code),
            Self::Forward { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether this is the not-found outcome.
    pub fn is_not_found(&self) -> bool {
        self.error_code() == Some(SessionErrorCode::NotFound.code())
    }

    /// Whether this failure came from forwarding to an owner node.
    pub fn is_forwarding(&self) -> bool {
        matches!(self, Self::Forward { .. })
    }
}
