//! Record store for connections, signatures, detections, and the audit trail.
//!
//! SQLite-backed. Token columns hold already-encrypted values; this layer
//! never touches the cipher. Timestamps are ISO 8601 strings.
//!
//! # Thread Safety
//! - Connection is wrapped in Mutex for safe concurrent access
//! - SQLite itself is thread-safe with serialized mode
//! - The detection upsert and token updates are single statements, so two
//!   racing scans of one connection cannot produce a torn row (though the
//!   last writer wins)

use crate::audit::AuditRecord;
use crate::catalog::ToolSignature;
use crate::connection::{ConnectionStatus, ProviderKind, WorkspaceConnection};
use crate::matcher::{DetectionRecord, DetectionResult};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

pub struct DiscoveryStore {
    conn: Mutex<Connection>,
}

impl DiscoveryStore {
    /// Creates or opens the store, applying the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                status TEXT NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                token_expires_at TEXT,
                last_scan_at TEXT,
                next_scan_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_connections_org
                ON connections(organization_id);

            CREATE TABLE IF NOT EXISTS tool_signatures (
                id TEXT PRIMARY KEY,
                tool_name TEXT NOT NULL UNIQUE,
                vendor_name TEXT NOT NULL,
                detection_patterns TEXT NOT NULL,
                confirmed INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detections (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                vendor_name TEXT,
                matched_signature_id TEXT,
                source TEXT NOT NULL,
                confidence REAL NOT NULL,
                user_count INTEGER,
                metadata TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE(organization_id, tool_name, connection_id)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY,
                organization_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Connections ──────────────────────────────────────────────────────

    pub fn insert_connection(&self, connection: &WorkspaceConnection) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO connections (
                    id, organization_id, provider, status,
                    access_token, refresh_token, token_expires_at,
                    last_scan_at, next_scan_at, last_error,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    connection.id.to_string(),
                    connection.organization_id.to_string(),
                    connection.provider.as_str(),
                    connection.status.as_str(),
                    connection.access_token,
                    connection.refresh_token,
                    connection.token_expires_at.map(|t| t.to_rfc3339()),
                    connection.last_scan_at.map(|t| t.to_rfc3339()),
                    connection.next_scan_at.map(|t| t.to_rfc3339()),
                    connection.last_error,
                    now,
                    now,
                ],
            )
            .context("Failed to insert connection")?;

        Ok(())
    }

    pub fn get_connection(&self, id: Uuid) -> Result<Option<WorkspaceConnection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, organization_id, provider, status,
                       access_token, refresh_token, token_expires_at,
                       last_scan_at, next_scan_at, last_error
                FROM connections
                WHERE id = ?1
                "#,
            )
            .context("Failed to prepare query")?;

        stmt.query_row(params![id.to_string()], row_to_connection)
            .optional()
            .context("Failed to load connection")
    }

    pub fn list_connections(&self, organization_id: Uuid) -> Result<Vec<WorkspaceConnection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, organization_id, provider, status,
                       access_token, refresh_token, token_expires_at,
                       last_scan_at, next_scan_at, last_error
                FROM connections
                WHERE organization_id = ?1
                ORDER BY created_at
                "#,
            )
            .context("Failed to prepare query")?;

        let connections = stmt
            .query_map(params![organization_id.to_string()], row_to_connection)
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read connections")?;

        Ok(connections)
    }

    /// Activates a pending connection with its first token grant.
    pub fn activate_connection(
        &self,
        id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE connections
                SET status = 'active',
                    access_token = ?2,
                    refresh_token = ?3,
                    token_expires_at = ?4,
                    last_error = NULL,
                    updated_at = ?5
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    access_token,
                    refresh_token,
                    token_expires_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to activate connection")?;

        Ok(())
    }

    /// Replaces the access token after a refresh; the refresh token is kept.
    pub fn update_access_token(
        &self,
        id: Uuid,
        access_token: &str,
        token_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE connections
                SET access_token = ?2,
                    token_expires_at = ?3,
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    access_token,
                    token_expires_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to update access token")?;

        Ok(())
    }

    /// One-way transition into `token_expired`; only a reconnect leaves it.
    pub fn mark_token_expired(&self, id: Uuid, error: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE connections
                SET status = 'token_expired',
                    last_error = ?2,
                    updated_at = ?3
                WHERE id = ?1
                "#,
                params![id.to_string(), error, Utc::now().to_rfc3339()],
            )
            .context("Failed to mark connection token_expired")?;

        Ok(())
    }

    /// Flags a connection for manual review after an unrecoverable failure,
    /// such as a stored secret that no longer decrypts.
    pub fn mark_error(&self, id: Uuid, error: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE connections
                SET status = 'error',
                    last_error = ?2,
                    updated_at = ?3
                WHERE id = ?1
                "#,
                params![id.to_string(), error, Utc::now().to_rfc3339()],
            )
            .context("Failed to mark connection errored")?;

        Ok(())
    }

    /// Post-scan bookkeeping: scan timestamps set, stale error cleared.
    pub fn update_scan_bookkeeping(
        &self,
        id: Uuid,
        last_scan_at: DateTime<Utc>,
        next_scan_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                UPDATE connections
                SET last_scan_at = ?2,
                    next_scan_at = ?3,
                    last_error = NULL,
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    last_scan_at.to_rfc3339(),
                    next_scan_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to update scan bookkeeping")?;

        Ok(())
    }

    // ── Signatures ───────────────────────────────────────────────────────

    /// Seeds catalog entries, skipping tool names that already exist.
    pub fn seed_signatures(&self, signatures: &[ToolSignature]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut inserted = 0;

        for sig in signatures {
            let patterns = serde_json::to_string(&sig.detection_patterns)
                .context("Failed to serialize detection patterns")?;

            inserted += conn
                .execute(
                    r#"
                    INSERT OR IGNORE INTO tool_signatures
                        (id, tool_name, vendor_name, detection_patterns, confirmed)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        sig.id.to_string(),
                        sig.tool_name,
                        sig.vendor_name,
                        patterns,
                        sig.confirmed as i64,
                    ],
                )
                .context("Failed to seed signature")?;
        }

        Ok(inserted)
    }

    pub fn list_signatures(&self) -> Result<Vec<ToolSignature>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, tool_name, vendor_name, detection_patterns, confirmed
                 FROM tool_signatures ORDER BY tool_name",
            )
            .context("Failed to prepare query")?;

        let signatures = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let patterns: String = row.get(3)?;
                Ok((id, row.get::<_, String>(1)?, row.get::<_, String>(2)?, patterns, row.get::<_, i64>(4)?))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read signatures")?
            .into_iter()
            .map(|(id, tool_name, vendor_name, patterns, confirmed)| {
                Ok(ToolSignature {
                    id: Uuid::parse_str(&id).context("Invalid signature id")?,
                    tool_name,
                    vendor_name,
                    detection_patterns: serde_json::from_str(&patterns)
                        .context("Invalid detection patterns")?,
                    confirmed: confirmed != 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(signatures)
    }

    // ── Detections ───────────────────────────────────────────────────────

    /// Upserts a detection keyed on (organization, tool name, connection).
    ///
    /// An existing row refreshes `last_seen` and volatile fields only;
    /// `first_seen` is immutable once set.
    pub fn upsert_detection(
        &self,
        organization_id: Uuid,
        connection_id: Uuid,
        detection: &DetectionResult,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let metadata = serde_json::to_string(&detection.metadata)
            .context("Failed to serialize detection metadata")?;

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO detections (
                    id, organization_id, connection_id, tool_name, vendor_name,
                    matched_signature_id, source, confidence, user_count,
                    metadata, first_seen, last_seen
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                ON CONFLICT(organization_id, tool_name, connection_id) DO UPDATE SET
                    vendor_name = excluded.vendor_name,
                    matched_signature_id = excluded.matched_signature_id,
                    source = excluded.source,
                    confidence = excluded.confidence,
                    user_count = excluded.user_count,
                    metadata = excluded.metadata,
                    last_seen = excluded.last_seen
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    organization_id.to_string(),
                    connection_id.to_string(),
                    detection.tool_name,
                    detection.vendor_name,
                    detection.matched_signature_id.map(|id| id.to_string()),
                    detection.source,
                    detection.confidence,
                    detection.user_count,
                    metadata,
                    seen_at.to_rfc3339(),
                ],
            )
            .context("Failed to upsert detection")?;

        Ok(())
    }

    pub fn list_detections(&self, organization_id: Uuid) -> Result<Vec<DetectionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT tool_name, vendor_name, matched_signature_id, source,
                       confidence, user_count, metadata, first_seen, last_seen
                FROM detections
                WHERE organization_id = ?1
                ORDER BY tool_name
                "#,
            )
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![organization_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read detections")?;

        rows.into_iter()
            .map(
                |(tool_name, vendor_name, sig_id, source, confidence, user_count, metadata, first, last)| {
                    Ok(DetectionRecord {
                        result: DetectionResult {
                            tool_name,
                            vendor_name,
                            matched_signature_id: sig_id
                                .map(|s| Uuid::parse_str(&s).context("Invalid signature id"))
                                .transpose()?,
                            source,
                            confidence,
                            user_count,
                            metadata: serde_json::from_str(&metadata)
                                .context("Invalid detection metadata")?,
                        },
                        first_seen: parse_timestamp(&first)?,
                        last_seen: parse_timestamp(&last)?,
                    })
                },
            )
            .collect()
    }

    // ── Audit trail ──────────────────────────────────────────────────────

    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let details = serde_json::to_string(&record.details)
            .context("Failed to serialize audit details")?;

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO audit_log (
                    organization_id, actor, entity_type, entity_id,
                    action_type, details, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    record.organization_id.to_string(),
                    record.actor,
                    record.entity_type,
                    record.entity_id.to_string(),
                    record.action.as_str(),
                    details,
                    record.created_at.to_rfc3339(),
                ],
            )
            .context("Failed to append audit record")?;

        Ok(())
    }

    /// Returns `(action_type, details)` rows for an organization, oldest first.
    pub fn list_audit(&self, organization_id: Uuid) -> Result<Vec<(String, serde_json::Value)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT action_type, details FROM audit_log
                 WHERE organization_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![organization_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audit log")?;

        rows.into_iter()
            .map(|(action, details)| {
                Ok((
                    action,
                    serde_json::from_str(&details).context("Invalid audit details")?,
                ))
            })
            .collect()
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse timestamp")
}

fn row_to_connection(row: &Row<'_>) -> rusqlite::Result<WorkspaceConnection> {
    let parse_col_ts = |idx: usize, value: Option<String>| {
        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            idx,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })
            })
            .transpose()
    };

    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let provider: String = row.get(2)?;
    let status: String = row.get(3)?;

    let invalid_text = |idx: usize, msg: &str| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())),
        )
    };

    Ok(WorkspaceConnection {
        id: Uuid::parse_str(&id).map_err(|_| invalid_text(0, "invalid connection id"))?,
        organization_id: Uuid::parse_str(&organization_id)
            .map_err(|_| invalid_text(1, "invalid organization id"))?,
        provider: ProviderKind::parse(&provider)
            .ok_or_else(|| invalid_text(2, "unknown provider kind"))?,
        status: ConnectionStatus::parse(&status)
            .ok_or_else(|| invalid_text(3, "unknown connection status"))?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        token_expires_at: parse_col_ts(6, row.get(6)?)?,
        last_scan_at: parse_col_ts(7, row.get(7)?)?,
        next_scan_at: parse_col_ts(8, row.get(8)?)?,
        last_error: row.get(9)?,
    })
}
