//! Caller authentication for the service boundary.
//!
//! Requests carry an organization-scoped bearer token. Extraction and shape
//! validation happen before any handler side effect; a request that fails
//! here is rejected with no state touched.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Extract the calling organization from the HTTP Authorization header.
///
/// Expected format: "Authorization: Bearer <org-token>"
pub fn extract_caller_org(headers: &HeaderMap) -> Result<Uuid, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Parse an organization token from an Authorization header value.
fn parse_bearer_token(header_value: &str) -> Result<Uuid, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if parts[0].to_lowercase() != "bearer" {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Uuid::parse_str(token).map_err(|_| TokenError::InvalidFormat)
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header not present
    Missing,
    /// Not "Bearer <token>" or the token is not a valid organization id
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
