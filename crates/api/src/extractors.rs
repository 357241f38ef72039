//! Request extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use mesh_core::is_valid_session_id;

use crate::response::ApiError;

/// Header carrying the session id on the streamable endpoint.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header a reconnecting stream client resumes from.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Session id from the `mcp-session-id` header, if present.
#[derive(Debug, Clone)]
pub struct SessionIdHeader(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for SessionIdHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match header_str(&parts.headers, SESSION_ID_HEADER) {
            None => Ok(SessionIdHeader(None)),
            Some(id) if is_valid_session_id(id) => Ok(SessionIdHeader(Some(id.to_string()))),
            Some(_) => Err(ApiError::bad_request("Invalid mcp-session-id header")),
        }
    }
}

/// Resume cursor from the `Last-Event-ID` header, if present.
#[derive(Debug, Clone)]
pub struct LastEventId(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for LastEventId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(LastEventId(
            header_str(&parts.headers, LAST_EVENT_ID_HEADER).map(str::to_string),
        ))
    }
}
