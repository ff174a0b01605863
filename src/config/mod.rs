//! Service configuration.
//!
//! Endpoint and tuning values come from an optional TOML file with serde
//! defaults per section. Secrets (encryption key, provider client
//! credentials) come from environment variables and are validated once at
//! startup — a missing or malformed secret prevents the service from
//! starting instead of failing inside a request.

use crate::connection::ProviderKind;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL used to build OAuth redirect URIs
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
        }
    }
}

/// Scan tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Upper bound on any single provider call (seconds)
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// How far ahead the next scheduled scan is set (days)
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_days: i64,
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_rescan_interval() -> i64 {
    7
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
            rescan_interval_days: default_rescan_interval(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "toolscan.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Per-provider endpoint overrides (tests point these at a mock server)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub workspace: Option<ProviderEndpoints>,
    #[serde(default)]
    pub tenant: Option<ProviderEndpoints>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
}

/// Fully-resolved settings a provider client is constructed from.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

fn default_endpoints(kind: ProviderKind) -> ProviderEndpoints {
    match kind {
        ProviderKind::Workspace => ProviderEndpoints {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base_url: "https://admin.googleapis.com".to_string(),
        },
        ProviderKind::Tenant => ProviderEndpoints {
            auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            api_base_url: "https://graph.microsoft.com".to_string(),
        },
    }
}

impl DiscoveryConfig {
    /// Resolves the settings for one provider kind.
    ///
    /// Client credentials are read from `TOOLSCAN_OAUTH_<KIND>_CLIENT_ID` /
    /// `_CLIENT_SECRET`; their absence is a configuration error, not a
    /// runtime one.
    pub fn provider_settings(&self, kind: ProviderKind) -> Result<ProviderSettings> {
        let env_prefix = kind.as_str().to_uppercase();
        let client_id = std::env::var(format!("TOOLSCAN_OAUTH_{}_CLIENT_ID", env_prefix))
            .with_context(|| format!("TOOLSCAN_OAUTH_{}_CLIENT_ID is not set", env_prefix))?;
        let client_secret = std::env::var(format!("TOOLSCAN_OAUTH_{}_CLIENT_SECRET", env_prefix))
            .with_context(|| format!("TOOLSCAN_OAUTH_{}_CLIENT_SECRET is not set", env_prefix))?;

        let endpoints = match kind {
            ProviderKind::Workspace => self.providers.workspace.clone(),
            ProviderKind::Tenant => self.providers.tenant.clone(),
        }
        .unwrap_or_else(|| default_endpoints(kind));

        Ok(ProviderSettings {
            client_id,
            client_secret,
            auth_url: endpoints.auth_url,
            token_url: endpoints.token_url,
            api_base_url: endpoints.api_base_url,
            timeout_secs: self.scan.provider_timeout_secs,
        })
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<DiscoveryConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    toml::from_str(&contents).context("Failed to parse config file")
}

/// Reads the 64-hex-char encryption key from the environment.
pub fn encryption_key_from_env() -> Result<String> {
    std::env::var("TOOLSCAN_ENCRYPTION_KEY").context("TOOLSCAN_ENCRYPTION_KEY is not set")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.api.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.scan.provider_timeout_secs, 30);
        assert_eq!(config.scan.rescan_interval_days, 7);
        assert_eq!(config.database.path, "toolscan.db");
        assert!(config.providers.workspace.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [api]
            bind_addr = "127.0.0.1:8080"
            callback_base_url = "https://discover.example.com"

            [scan]
            provider_timeout_secs = 10
            rescan_interval_days = 3

            [database]
            path = "/var/lib/toolscan/data.db"

            [providers.workspace]
            auth_url = "http://localhost:9999/auth"
            token_url = "http://localhost:9999/token"
            api_base_url = "http://localhost:9999"
        "#;

        let config: DiscoveryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.scan.provider_timeout_secs, 10);
        assert_eq!(config.scan.rescan_interval_days, 3);
        assert_eq!(config.database.path, "/var/lib/toolscan/data.db");
        assert_eq!(
            config.providers.workspace.as_ref().unwrap().token_url,
            "http://localhost:9999/token"
        );
        assert!(config.providers.tenant.is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
            [scan]
            provider_timeout_secs = 5
        "#;

        let config: DiscoveryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scan.provider_timeout_secs, 5);
        assert_eq!(config.scan.rescan_interval_days, 7); // Default
        assert_eq!(config.api.bind_addr, "0.0.0.0:3000"); // Default
    }

    #[test]
    fn test_default_endpoints_differ_per_kind() {
        let ws = default_endpoints(ProviderKind::Workspace);
        let tn = default_endpoints(ProviderKind::Tenant);
        assert_ne!(ws.token_url, tn.token_url);
        assert!(ws.token_url.contains("googleapis"));
        assert!(tn.token_url.contains("microsoftonline"));
    }
}
