//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub store_connected: bool,
    pub local_sessions: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// API error carrying a stable error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALID_001", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
    }

    fn with_detail(mut self, detail: String) -> Self {
        self.response = self.response.with_details(vec![detail]);
        self
    }

    pub fn code(&self) -> &str {
        &self.response.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<mesh_core::Error> for ApiError {
    fn from(err: mesh_core::Error) -> Self {
        use mesh_core::Error;

        match &err {
            Error::Session {
                code,
                message,
                http_status,
            }
            | Error::Validation {
                code,
                message,
                http_status,
            }
            | Error::Store {
                code,
                message,
                http_status,
            }
            | Error::Forward {
                code,
                message,
                http_status,
            } => {
                let status =
                    StatusCode::from_u16(*http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                ApiError::with_code(status, *code, message)
            }
            Error::Serialization(e) => {
                ApiError::bad_request("Invalid JSON body").with_detail(e.to_string())
            }
            Error::TransportClosed(session_id) => ApiError::with_code(
                StatusCode::GONE,
                "SESSION_003",
                format!("transport for session {} is closed", session_id),
            ),
            Error::Internal(msg) => ApiError::internal(msg.clone()),
        }
    }
}
