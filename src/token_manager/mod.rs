//! Access-token lifecycle for stored connections.
//!
//! "Get me a currently-valid access token for this connection": returns the
//! stored token while it is comfortably fresh, otherwise refreshes against
//! the provider, re-encrypts, and persists. A failed refresh moves the
//! connection to `token_expired` — a one-way transition from here; only the
//! external reconnect flow leaves that state.

use crate::audit::{AuditAction, AuditRecord};
use crate::connection::WorkspaceConnection;
use crate::credentials::{Secret, TokenCipher};
use crate::provider::TokenProvider;
use crate::store::DiscoveryStore;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Safety margin before expiry. A token valid at check-time could expire
/// mid-flight during the subsequent API calls; refreshing this early avoids
/// the race.
const REFRESH_BUFFER_MINUTES: i64 = 5;

pub struct ConnectionTokenManager {
    store: Arc<DiscoveryStore>,
    cipher: TokenCipher,
}

impl ConnectionTokenManager {
    pub fn new(store: Arc<DiscoveryStore>, cipher: TokenCipher) -> Self {
        Self { store, cipher }
    }

    /// Returns a valid plaintext access token, refreshing if needed.
    ///
    /// `Ok(None)` means the connection cannot proceed and needs a reconnect:
    /// either no refresh token is stored, or the provider rejected the
    /// refresh (in which case the connection has been moved to
    /// `token_expired` with the error message persisted).
    ///
    /// Cipher failures (malformed or tampered stored secrets) indicate
    /// corruption, not an expired credential: the connection is flagged for
    /// manual review (`status = error`) and the failure propagates.
    pub async fn get_valid_access_token(
        &self,
        connection: &WorkspaceConnection,
        provider: &dyn TokenProvider,
    ) -> Result<Option<String>> {
        let now = Utc::now();
        let buffer = Duration::minutes(REFRESH_BUFFER_MINUTES);

        // Stored token still comfortably fresh: use it as-is
        if let (Some(expires_at), Some(stored)) =
            (connection.token_expires_at, connection.access_token.as_deref())
        {
            if expires_at > now + buffer {
                let token = self.reveal_or_flag(connection, stored, "access")?;
                return Ok(Some(token));
            }
        }

        // Refresh required
        let Some(stored_refresh) = connection.refresh_token.as_deref() else {
            info!(
                connection_id = %connection.id,
                "Access token expired and no refresh token stored; reconnect required"
            );
            return Ok(None);
        };

        let refresh_token = self.reveal_or_flag(connection, stored_refresh, "refresh")?;

        match provider.refresh(&refresh_token).await {
            Ok(grant) => {
                let encrypted = self
                    .cipher
                    .encrypt(&grant.access_token)
                    .context("Failed to encrypt refreshed access token")?;
                let expires_at = now + Duration::seconds(grant.expires_in);

                self.store
                    .update_access_token(connection.id, &encrypted, expires_at)?;

                info!(
                    connection_id = %connection.id,
                    expires_in = grant.expires_in,
                    "Access token refreshed"
                );

                Ok(Some(grant.access_token))
            }
            Err(e) => {
                // Full provider payload stays in server logs only
                warn!(
                    connection_id = %connection.id,
                    error = %e,
                    payload = e.payload.as_deref().unwrap_or(""),
                    "Token refresh rejected by provider"
                );

                let message = format!("Token refresh failed: {}", e);
                self.store.mark_token_expired(connection.id, &message)?;

                // Audit is best-effort; the transition itself already landed
                let audit = AuditRecord::for_connection(
                    connection.organization_id,
                    "system",
                    connection.id,
                    AuditAction::TokenExpired,
                    json!({
                        "provider": connection.provider.as_str(),
                        "error": message,
                    }),
                );
                if let Err(audit_err) = self.store.append_audit(&audit) {
                    warn!(
                        connection_id = %connection.id,
                        error = %audit_err,
                        "Failed to append audit record"
                    );
                }

                Ok(None)
            }
        }
    }

    /// Decrypts a stored secret. An unreadable secret flags the connection
    /// for manual review before the error surfaces; only a fresh reconnect
    /// replaces the corrupted value.
    fn reveal_or_flag(
        &self,
        connection: &WorkspaceConnection,
        stored: &str,
        which: &str,
    ) -> Result<String> {
        match Secret::parse(stored).reveal(&self.cipher) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(
                    connection_id = %connection.id,
                    token = which,
                    error = %e,
                    "Stored token unreadable; flagging connection for review"
                );
                self.store.mark_error(
                    connection.id,
                    &format!("Stored {} token unreadable: {}", which, e),
                )?;
                Err(anyhow::Error::new(e))
                    .with_context(|| format!("Stored {} token is unreadable", which))
            }
        }
    }
}
