//! Workspace connection model.
//!
//! A connection links one organization to one external workspace provider and
//! carries the encrypted OAuth tokens plus scan bookkeeping. Connections are
//! created by the connection-setup flow (`pending`), activated by the OAuth
//! callback, and scanned by the orchestrator. This core never deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which provider variant the connection talks to.
///
/// The two variants share one token contract and differ only in endpoint and
/// request shape; dispatch is on this enum, never on strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google-Workspace-style provider (domain-wide app token audit)
    Workspace,
    /// Microsoft-365-style provider (tenant service principals)
    Tenant,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Workspace => "workspace",
            ProviderKind::Tenant => "tenant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workspace" => Some(ProviderKind::Workspace),
            "tenant" => Some(ProviderKind::Tenant),
            _ => None,
        }
    }
}

/// Connection lifecycle state.
///
/// `TokenExpired` is terminal until an operator reconnects; nothing in this
/// core auto-recovers from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Created, awaiting OAuth callback
    Pending,
    /// Tokens stored, scannable
    Active,
    /// Refresh failed; operator must reconnect
    TokenExpired,
    /// Unrecoverable error flagged for manual review
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::TokenExpired => "token_expired",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConnectionStatus::Pending),
            "active" => Some(ConnectionStatus::Active),
            "token_expired" => Some(ConnectionStatus::TokenExpired),
            "error" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }
}

/// One organization's link to one external workspace provider.
///
/// Token columns hold the `hex(nonce):hex(ciphertext‖tag)` encrypted form, or
/// legacy plaintext for rows written before encryption was introduced. Readers
/// resolve the shape through [`crate::credentials::Secret::parse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceConnection {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: ProviderKind,
    pub status: ConnectionStatus,

    /// Encrypted access token (None until the OAuth callback completes)
    pub access_token: Option<String>,
    /// Encrypted refresh token, when the provider issued one
    pub refresh_token: Option<String>,
    /// When the access token expires (UTC)
    pub token_expires_at: Option<DateTime<Utc>>,

    pub last_scan_at: Option<DateTime<Utc>>,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WorkspaceConnection {
    /// Creates a pending connection awaiting its OAuth callback.
    pub fn new(organization_id: Uuid, provider: ProviderKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            provider,
            status: ConnectionStatus::Pending,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            last_scan_at: None,
            next_scan_at: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [ProviderKind::Workspace, ProviderKind::Tenant] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("google_workspace"), None);
        assert_eq!(ProviderKind::parse(""), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Active,
            ConnectionStatus::TokenExpired,
            ConnectionStatus::Error,
        ] {
            assert_eq!(ConnectionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ConnectionStatus::parse("expired"), None);
    }

    #[test]
    fn test_new_connection_is_pending() {
        let conn = WorkspaceConnection::new(Uuid::new_v4(), ProviderKind::Workspace);
        assert_eq!(conn.status, ConnectionStatus::Pending);
        assert!(conn.access_token.is_none());
        assert!(conn.last_scan_at.is_none());
    }
}
