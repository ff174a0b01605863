//! OAuth connect flow for workspace connections.
//!
//! 1. Operator hits /api/connections/:id/oauth/start → redirect to provider
//! 2. Provider redirects back to /api/oauth/callback with code + state
//! 3. Callback verifies the connection is still pending, exchanges the code,
//!    stores encrypted tokens, and activates the connection
//!
//! The state parameter is base64-encoded JSON carrying the connection id and
//! redirect URI plus a random nonce. The callback is a one-shot consumer: a
//! connection that is no longer `pending` rejects the callback outright,
//! which is the primary defense against replay.

use super::{AppError, AppState};
use crate::audit::{AuditAction, AuditRecord};
use crate::auth::extract_caller_org;
use crate::connection::ConnectionStatus;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Redirect, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payload carried through the provider round-trip in the `state` parameter.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct CallbackState {
    pub state_nonce: String,
    pub connection_id: Uuid,
    pub redirect_uri: String,
}

impl CallbackState {
    fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    /// Decodes and validates a state parameter. Every field is required;
    /// anything else is a malformed or forged state.
    fn decode(raw: &str) -> Option<Self> {
        let bytes = BASE64.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub(crate) struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub(crate) struct OAuthSuccessResponse {
    success: bool,
    message: String,
    connection_id: Uuid,
}

/// GET /api/connections/:id/oauth/start
///
/// Redirects the operator to the provider's authorization page with an
/// encoded state payload. Only the owning organization may start the flow,
/// and only for a connection still awaiting its callback.
pub(crate) async fn oauth_start(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let caller_org = extract_caller_org(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let connection = state
        .store
        .get_connection(connection_id)
        .map_err(|e| {
            error!(connection_id = %connection_id, error = %e, "Failed to load connection");
            AppError::ServerError("Internal error".to_string())
        })?
        .filter(|c| c.organization_id == caller_org)
        .ok_or_else(|| AppError::NotFound("Connection not found".to_string()))?;

    if connection.status != ConnectionStatus::Pending {
        return Err(AppError::Conflict(
            "Connection is not awaiting authorization".to_string(),
        ));
    }

    let state_nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    let redirect_uri = format!("{}/api/oauth/callback", state.callback_base_url);

    let callback_state = CallbackState {
        state_nonce,
        connection_id,
        redirect_uri: redirect_uri.clone(),
    };
    let encoded = callback_state.encode().map_err(|e| {
        error!(error = %e, "Failed to encode OAuth state");
        AppError::ServerError("Internal error".to_string())
    })?;

    let provider = state.providers.get(connection.provider);
    let auth_url = provider.authorize_url(&encoded, &redirect_uri);

    info!(
        connection_id = %connection_id,
        provider = connection.provider.as_str(),
        "Redirecting to OAuth provider"
    );

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/oauth/callback
///
/// One-shot consumer of the provider redirect. Exchanges the authorization
/// code, encrypts the granted tokens, and activates the connection.
pub(crate) async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    // Provider-reported authorization failure
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "Authorization failed: {}",
            error
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let raw_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let callback_state = CallbackState::decode(&raw_state).ok_or_else(|| {
        warn!("OAuth callback with undecodable state parameter");
        AppError::BadRequest("Invalid 'state' parameter".to_string())
    })?;

    debug!(connection_id = %callback_state.connection_id, "OAuth callback state decoded");

    let connection = state
        .store
        .get_connection(callback_state.connection_id)
        .map_err(|e| {
            error!(error = %e, "Failed to load connection for callback");
            AppError::ServerError("Internal error".to_string())
        })?
        .ok_or_else(|| AppError::NotFound("Connection not found".to_string()))?;

    // Replay defense: only a pending connection may consume a callback
    if connection.status != ConnectionStatus::Pending {
        warn!(
            connection_id = %connection.id,
            status = connection.status.as_str(),
            "Rejected OAuth callback against non-pending connection"
        );
        return Err(AppError::Conflict(
            "Connection has already been processed".to_string(),
        ));
    }

    let provider = state.providers.get(connection.provider);
    let grant = provider
        .exchange_code(&code, &callback_state.redirect_uri)
        .await
        .map_err(|e| {
            // Raw provider payload stays in server logs
            error!(
                connection_id = %connection.id,
                error = %e,
                payload = e.payload.as_deref().unwrap_or(""),
                "Token exchange failed"
            );
            AppError::BadGateway("Failed to exchange authorization code".to_string())
        })?;

    let encrypted_access = state.cipher.encrypt(&grant.access_token).map_err(|e| {
        error!(connection_id = %connection.id, error = %e, "Failed to encrypt access token");
        AppError::ServerError("Internal error".to_string())
    })?;
    let encrypted_refresh = grant
        .refresh_token
        .as_deref()
        .map(|t| state.cipher.encrypt(t))
        .transpose()
        .map_err(|e| {
            error!(connection_id = %connection.id, error = %e, "Failed to encrypt refresh token");
            AppError::ServerError("Internal error".to_string())
        })?;

    let expires_at = Utc::now() + Duration::seconds(grant.expires_in);
    state
        .store
        .activate_connection(
            connection.id,
            &encrypted_access,
            encrypted_refresh.as_deref(),
            expires_at,
        )
        .map_err(|e| {
            error!(connection_id = %connection.id, error = %e, "Failed to store tokens");
            AppError::ServerError("Internal error".to_string())
        })?;

    // Audit is best-effort; a failed write must not undo the connect
    let audit = AuditRecord::for_connection(
        connection.organization_id,
        "system",
        connection.id,
        AuditAction::Connected,
        json!({
            "provider": connection.provider.as_str(),
            "has_refresh_token": encrypted_refresh.is_some(),
        }),
    );
    if let Err(e) = state.store.append_audit(&audit) {
        warn!(connection_id = %connection.id, error = %e, "Failed to append audit record");
    }

    info!(
        connection_id = %connection.id,
        provider = connection.provider.as_str(),
        has_refresh_token = encrypted_refresh.is_some(),
        "Connection activated"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: "Connection authorized".to_string(),
        connection_id: connection.id,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_state_round_trip() {
        let original = CallbackState {
            state_nonce: "nonce-123".to_string(),
            connection_id: Uuid::new_v4(),
            redirect_uri: "http://localhost:3000/api/oauth/callback".to_string(),
        };

        let encoded = original.encode().unwrap();
        let decoded = CallbackState::decode(&encoded).unwrap();

        assert_eq!(decoded.state_nonce, original.state_nonce);
        assert_eq!(decoded.connection_id, original.connection_id);
        assert_eq!(decoded.redirect_uri, original.redirect_uri);
    }

    #[test]
    fn test_state_with_missing_field_rejected() {
        let partial = BASE64.encode(r#"{"state_nonce": "n", "redirect_uri": "r"}"#);
        assert!(CallbackState::decode(&partial).is_none());
    }

    #[test]
    fn test_state_not_base64_rejected() {
        assert!(CallbackState::decode("not base64 !!!").is_none());
        assert!(CallbackState::decode("").is_none());
    }

    #[test]
    fn test_callback_query_deserialization() {
        let query = "code=auth_code_123&state=abcdef";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("abcdef".to_string()));
        assert_eq!(callback.error, None);

        let query = "error=access_denied&error_description=User+cancelled";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }
}
