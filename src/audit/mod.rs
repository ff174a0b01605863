//! Append-only audit trail for connection state transitions.
//!
//! Every transition (connected, scan completed, token expired) emits one
//! record. The trail is a side channel: a failed write is surfaced in logs
//! but never aborts the primary operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Connected,
    ScanCompleted,
    TokenExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Connected => "connected",
            AuditAction::ScanCompleted => "scan_completed",
            AuditAction::TokenExpired => "token_expired",
        }
    }
}

/// One audit trail entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub organization_id: Uuid,
    /// Who triggered the transition ("system" for scheduled work)
    pub actor: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Builds a record for a workspace connection transition.
    pub fn for_connection(
        organization_id: Uuid,
        actor: &str,
        connection_id: Uuid,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Self {
        Self {
            organization_id,
            actor: actor.to_string(),
            entity_type: "workspace_connection".to_string(),
            entity_id: connection_id,
            action,
            details,
            created_at: Utc::now(),
        }
    }
}
