//! Google-Workspace-style provider.
//!
//! Token endpoint speaks standard OAuth 2.0 form encoding; the app listing
//! comes from the domain-wide OAuth token audit, which reports every
//! third-party app users have granted access to.

use super::{http_client, parse_token_response, ObservedApp, ProviderError, TokenGrant, TokenProvider};
use crate::config::ProviderSettings;
use crate::connection::ProviderKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

pub struct WorkspaceProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl WorkspaceProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let client = http_client(settings.timeout_secs);
        Self { settings, client }
    }

    async fn post_token_form(
        &self,
        form: &HashMap<&str, &str>,
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(&self.settings.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_token_response(status, &body)
    }
}

/// Domain token-audit listing shape.
#[derive(Deserialize)]
struct TokenAuditResponse {
    #[serde(default)]
    items: Vec<TokenAuditItem>,
}

#[derive(Deserialize)]
struct TokenAuditItem {
    #[serde(rename = "displayText", default)]
    display_text: Option<String>,
    #[serde(rename = "clientId", default)]
    client_id: Option<String>,
    #[serde(rename = "userCount", default)]
    user_count: Option<i64>,
}

#[async_trait]
impl TokenProvider for WorkspaceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Workspace
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&access_type=offline&prompt=consent",
            self.settings.auth_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode("https://www.googleapis.com/auth/admin.directory.user.security"),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        debug!(token_url = %self.settings.token_url, "Exchanging authorization code (workspace)");

        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", redirect_uri);
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());

        self.post_token_form(&form).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        debug!(token_url = %self.settings.token_url, "Refreshing access token (workspace)");

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());

        self.post_token_form(&form).await
    }

    async fn fetch_apps(&self, access_token: &str) -> Result<Vec<ObservedApp>, ProviderError> {
        let url = format!(
            "{}/admin/directory/v1/customer/my_customer/tokens",
            self.settings.api_base_url
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::rejected(status, body));
        }

        let listing: TokenAuditResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(&e.to_string(), body.clone()))?;

        let apps = listing
            .items
            .into_iter()
            .filter_map(|item| {
                // Entries without a display name cannot be matched
                let name = item.display_text?;
                Some(ObservedApp {
                    name,
                    external_id: item.client_id,
                    user_count: item.user_count,
                })
            })
            .collect();

        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    fn settings(base: &str) -> ProviderSettings {
        ProviderSettings {
            client_id: "ws-client".to_string(),
            client_secret: "ws-secret".to_string(),
            auth_url: format!("{}/auth", base),
            token_url: format!("{}/token", base),
            api_base_url: base.to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_authorize_url_encodes_params() {
        let provider = WorkspaceProvider::new(settings("https://example.com"));
        let url = provider.authorize_url("state-123", "http://localhost:3000/api/oauth/callback");

        assert!(url.starts_with("https://example.com/auth?"));
        assert!(url.contains("client_id=ws-client"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Foauth%2Fcallback"));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body(r#"{"access_token": "fresh", "expires_in": 3600}"#)
            .create_async()
            .await;

        let provider = WorkspaceProvider::new(settings(&server.url()));
        let grant = provider.refresh("old-refresh").await.unwrap();

        assert_eq!(grant.access_token, "fresh");
        assert_eq!(grant.expires_in, 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejection_carries_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let provider = WorkspaceProvider::new(settings(&server.url()));
        let err = provider.refresh("revoked").await.unwrap_err();

        assert_eq!(err.status, Some(400));
        assert!(err.payload.as_deref().unwrap().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_fetch_apps_parses_token_audit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/admin/directory/v1/customer/my_customer/tokens")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                r#"{"items": [
                    {"displayText": "ChatGPT Enterprise", "clientId": "cg-1", "userCount": 12},
                    {"clientId": "nameless"},
                    {"displayText": "Random CRM", "clientId": "crm-1"}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = WorkspaceProvider::new(settings(&server.url()));
        let apps = provider.fetch_apps("tok").await.unwrap();

        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].name, "ChatGPT Enterprise");
        assert_eq!(apps[0].user_count, Some(12));
        assert_eq!(apps[1].name, "Random CRM");
        assert_eq!(apps[1].user_count, None);
    }

    #[tokio::test]
    async fn test_fetch_apps_error_is_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/admin/directory/v1/customer/my_customer/tokens")
            .with_status(403)
            .with_body(r#"{"error": {"message": "insufficient scope"}}"#)
            .create_async()
            .await;

        let provider = WorkspaceProvider::new(settings(&server.url()));
        let err = provider.fetch_apps("tok").await.unwrap_err();
        assert_eq!(err.status, Some(403));
    }
}
