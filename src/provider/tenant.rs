//! Microsoft-365-style tenant provider.
//!
//! Same OAuth contract as the workspace variant with two shape differences:
//! token requests carry an explicit `scope` parameter, and the app listing
//! comes from the tenant's service-principal directory.

use super::{http_client, parse_token_response, ObservedApp, ProviderError, TokenGrant, TokenProvider};
use crate::config::ProviderSettings;
use crate::connection::ProviderKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Graph scope requested on exchange and refresh.
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default offline_access";

pub struct TenantProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl TenantProvider {
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

/// Service-principal listing shape.
#[derive(Deserialize)]
struct ServicePrincipalResponse {
    #[serde(default)]
    value: Vec<ServicePrincipal>,
}

#[derive(Deserialize)]
struct ServicePrincipal {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "appId", default)]
    app_id: Option<String>,
}

#[async_trait]
impl TokenProvider for TenantProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tenant
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code&response_mode=query",
            self.settings.auth_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GRAPH_SCOPE),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        debug!(token_url = %self.settings.token_url, "Exchanging authorization code (tenant)");

        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", redirect_uri);
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());
        form.insert("scope", GRAPH_SCOPE);

        self.post_token_form(&form).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        debug!(token_url = %self.settings.token_url, "Refreshing access token (tenant)");

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());
        form.insert("scope", GRAPH_SCOPE);

        self.post_token_form(&form).await
    }

    async fn fetch_apps(&self, access_token: &str) -> Result<Vec<ObservedApp>, ProviderError> {
        let url = format!("{}/v1.0/servicePrincipals", self.settings.api_base_url);

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

        let listing: ServicePrincipalResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(&e.to_string(), body.clone()))?;

        let apps = listing
            .value
            .into_iter()
            .filter_map(|sp| {
                let name = sp.display_name?;
                Some(ObservedApp {
                    name,
                    external_id: sp.app_id,
                    // Service-principal listings carry no usage counts
                    user_count: None,
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
            client_id: "tenant-client".to_string(),
            client_secret: "tenant-secret".to_string(),
            auth_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            api_base_url: base.to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_authorize_url_includes_graph_scope() {
        let provider = TenantProvider::new(settings("https://login.example.com"));
        let url = provider.authorize_url("st", "http://localhost:3000/cb");

        assert!(url.contains("scope=https%3A%2F%2Fgraph.microsoft.com%2F.default%20offline_access"));
        assert!(url.contains("response_mode=query"));
    }

    #[tokio::test]
    async fn test_exchange_code_sends_scope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "auth-code".into()),
                mockito::Matcher::UrlEncoded("scope".into(), GRAPH_SCOPE.into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token": "at", "refresh_token": "rt", "expires_in": 4000}"#,
            )
            .create_async()
            .await;

        let provider = TenantProvider::new(settings(&server.url()));
        let grant = provider
            .exchange_code("auth-code", "http://localhost:3000/cb")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token, Some("rt".to_string()));
        assert_eq!(grant.expires_in, 4000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_apps_parses_service_principals() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1.0/servicePrincipals")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                r#"{"value": [
                    {"displayName": "Copilot Studio", "appId": "app-1"},
                    {"appId": "nameless"}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = TenantProvider::new(settings(&server.url()));
        let apps = provider.fetch_apps("tok").await.unwrap();

        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "Copilot Studio");
        assert_eq!(apps[0].external_id, Some("app-1".to_string()));
        assert!(apps[0].user_count.is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_structured() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error": "invalid_client"}"#)
            .create_async()
            .await;

        let provider = TenantProvider::new(settings(&server.url()));
        let err = provider.refresh("rt").await.unwrap_err();
        assert_eq!(err.status, Some(401));
        assert!(err.payload.as_deref().unwrap().contains("invalid_client"));
    }
}
