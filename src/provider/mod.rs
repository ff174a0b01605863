//! Workspace identity providers: token exchange, refresh, and app listing.
//!
//! Two provider variants share one contract and differ only in endpoint and
//! request shape. Dispatch is on [`ProviderKind`], selected from the
//! connection record. This layer performs no retries — retry policy belongs to
//! the caller — and never panics on an HTTP-level failure it can still parse
//! into a structured [`ProviderError`].

mod tenant;
mod workspace;

pub use tenant::TenantProvider;
pub use workspace::WorkspaceProvider;

use crate::config::ProviderSettings;
use crate::connection::ProviderKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Tokens returned by a successful exchange or refresh.
#[derive(Clone, Debug)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
}

/// One application observed in a workspace listing, before matching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservedApp {
    pub name: String,
    /// Provider-side identifier (OAuth client id, app id)
    pub external_id: Option<String>,
    pub user_count: Option<i64>,
}

/// The provider rejected a request, or the request could not complete.
///
/// Carries the raw provider payload for server-side logs; callers convert
/// this into the `token_expired` transition, never into a crash.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
    /// Raw provider response body, when one was readable
    pub payload: Option<String>,
}

impl ProviderError {
    pub fn rejected(status: u16, payload: String) -> Self {
        Self {
            status: Some(status),
            message: format!("provider rejected request with status {}", status),
            payload: Some(payload),
        }
    }

    pub fn malformed(detail: &str, payload: String) -> Self {
        Self {
            status: None,
            message: format!("provider response malformed: {}", detail),
            payload: Some(payload),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: format!("provider request failed: {}", err),
            payload: None,
        }
    }
}

/// Common contract for both provider variants.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Builds the user-facing authorization URL for the connect flow.
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError>;

    /// Obtains a fresh access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Lists third-party applications visible in the workspace.
    async fn fetch_apps(&self, access_token: &str) -> Result<Vec<ObservedApp>, ProviderError>;
}

/// Selects the provider implementation for a connection.
pub fn provider_for(kind: ProviderKind, settings: &ProviderSettings) -> Box<dyn TokenProvider> {
    match kind {
        ProviderKind::Workspace => Box::new(WorkspaceProvider::new(settings.clone())),
        ProviderKind::Tenant => Box::new(TenantProvider::new(settings.clone())),
    }
}

/// Both provider clients, constructed once at startup.
pub struct ProviderRegistry {
    workspace: Box<dyn TokenProvider>,
    tenant: Box<dyn TokenProvider>,
}

impl ProviderRegistry {
    pub fn new(workspace: Box<dyn TokenProvider>, tenant: Box<dyn TokenProvider>) -> Self {
        Self { workspace, tenant }
    }

    /// Builds both clients from resolved configuration, failing fast on
    /// missing provider credentials.
    pub fn from_config(config: &crate::config::DiscoveryConfig) -> anyhow::Result<Self> {
        let workspace = config.provider_settings(ProviderKind::Workspace)?;
        let tenant = config.provider_settings(ProviderKind::Tenant)?;
        Ok(Self::new(
            provider_for(ProviderKind::Workspace, &workspace),
            provider_for(ProviderKind::Tenant, &tenant),
        ))
    }

    pub fn get(&self, kind: ProviderKind) -> &dyn TokenProvider {
        match kind {
            ProviderKind::Workspace => self.workspace.as_ref(),
            ProviderKind::Tenant => self.tenant.as_ref(),
        }
    }
}

/// Standard OAuth 2.0 token response, shared by both variants.
#[derive(Deserialize, Debug)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Default access-token lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Parses a token-endpoint response into a grant.
///
/// A readable body without an `access_token` field is a structured provider
/// rejection, not a transport error — the raw payload rides along for logs.
pub(crate) fn parse_token_response(
    status: u16,
    body: &str,
) -> Result<TokenGrant, ProviderError> {
    let parsed: TokenResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            if (200..300).contains(&status) {
                return Err(ProviderError::malformed(&e.to_string(), body.to_string()));
            }
            return Err(ProviderError::rejected(status, body.to_string()));
        }
    };

    match parsed.access_token {
        Some(access_token) if !access_token.is_empty() => Ok(TokenGrant {
            access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
        }),
        _ => Err(ProviderError::rejected(status, body.to_string())),
    }
}

/// Builds the shared reqwest client with the configured finite timeout, so a
/// hung provider call cannot starve the invoking scan indefinitely.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_token_response() {
        let body = r#"{
            "access_token": "ya29.new-token",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        }"#;

        let grant = parse_token_response(200, body).unwrap();
        assert_eq!(grant.access_token, "ya29.new-token");
        assert_eq!(grant.refresh_token, Some("1//refresh".to_string()));
        assert_eq!(grant.expires_in, 3599);
    }

    #[test]
    fn test_parse_minimal_token_response_defaults_expiry() {
        let grant = parse_token_response(200, r#"{"access_token": "tok"}"#).unwrap();
        assert_eq!(grant.expires_in, DEFAULT_EXPIRES_IN);
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn test_error_payload_surfaced_not_thrown() {
        let body = r#"{"error": "invalid_grant", "error_description": "Token revoked"}"#;

        let err = parse_token_response(400, body).unwrap_err();
        assert_eq!(err.status, Some(400));
        assert!(err.payload.as_deref().unwrap().contains("invalid_grant"));
    }

    #[test]
    fn test_success_status_without_access_token_is_rejection() {
        let err = parse_token_response(200, r#"{"scope": "none"}"#).unwrap_err();
        assert_eq!(err.status, Some(200));
    }

    #[test]
    fn test_unparseable_error_body_keeps_raw_payload() {
        let err = parse_token_response(502, "<html>Bad Gateway</html>").unwrap_err();
        assert_eq!(err.status, Some(502));
        assert!(err.payload.as_deref().unwrap().contains("Bad Gateway"));
    }
}
