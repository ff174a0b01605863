//! Scan orchestration.
//!
//! One scan invocation is a single request-scoped sequence:
//! load connection → obtain valid token → fetch raw apps → match → persist →
//! update bookkeeping → audit. No fan-out, no shared in-memory state between
//! invocations; the only shared resource is the connection row itself.

use crate::config::ScanConfig;
use crate::credentials::TokenCipher;
use crate::matcher;
use crate::provider::ProviderRegistry;
use crate::store::DiscoveryStore;
use crate::token_manager::ConnectionTokenManager;
use crate::audit::{AuditAction, AuditRecord};
use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How a scan request can fail, as seen by the service boundary.
///
/// Internal detail never crosses this boundary: the API layer maps these to
/// generic messages while the full cause stays in server logs.
#[derive(Debug)]
pub enum ScanError {
    /// Connection missing, or not owned by the caller (indistinguishable on
    /// purpose)
    ConnectionNotFound,
    /// No usable token and no way to refresh; operator must reconnect
    NeedsReconnect,
    Internal(anyhow::Error),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::ConnectionNotFound => write!(f, "Connection not found"),
            ScanError::NeedsReconnect => write!(f, "Connection requires re-authentication"),
            ScanError::Internal(e) => write!(f, "Scan failed: {}", e),
        }
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(e: anyhow::Error) -> Self {
        ScanError::Internal(e)
    }
}

/// One matched or fallback tool in the scan response.
#[derive(Clone, Debug, Serialize)]
pub struct ScanToolSummary {
    pub name: String,
    pub vendor: Option<String>,
    pub confidence: f64,
}

/// Result of one completed scan.
#[derive(Clone, Debug, Serialize)]
pub struct ScanOutcome {
    pub tools_found: usize,
    pub tools: Vec<ScanToolSummary>,
}

pub struct ScanOrchestrator {
    store: Arc<DiscoveryStore>,
    token_manager: ConnectionTokenManager,
    providers: Arc<ProviderRegistry>,
    scan_config: ScanConfig,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<DiscoveryStore>,
        cipher: TokenCipher,
        providers: Arc<ProviderRegistry>,
        scan_config: ScanConfig,
    ) -> Self {
        let token_manager = ConnectionTokenManager::new(Arc::clone(&store), cipher);
        Self {
            store,
            token_manager,
            providers,
            scan_config,
        }
    }

    /// Runs one scan for a connection owned by `caller_org`.
    ///
    /// The caller has already been authenticated; ownership is enforced here
    /// before any side effect. A provider fetch failure does not abort the
    /// scan — it yields zero apps for that step and is recorded.
    pub async fn run_scan(
        &self,
        caller_org: Uuid,
        connection_id: Uuid,
    ) -> Result<ScanOutcome, ScanError> {
        let started = std::time::Instant::now();

        // Load and authorize: a foreign connection looks like a missing one
        let connection = self
            .store
            .get_connection(connection_id)?
            .filter(|c| c.organization_id == caller_org)
            .ok_or(ScanError::ConnectionNotFound)?;

        let provider = self.providers.get(connection.provider);

        // Obtain a valid token before touching anything else
        let access_token = self
            .token_manager
            .get_valid_access_token(&connection, provider)
            .await?
            .ok_or(ScanError::NeedsReconnect)?;

        // Fetch: a failed listing is a valid empty result, not an abort
        let (apps, fetch_failed) = match provider.fetch_apps(&access_token).await {
            Ok(apps) => (apps, false),
            Err(e) => {
                warn!(
                    connection_id = %connection.id,
                    provider = connection.provider.as_str(),
                    error = %e,
                    payload = e.payload.as_deref().unwrap_or(""),
                    "App fetch failed; treating as zero apps"
                );
                (Vec::new(), true)
            }
        };

        let signatures = self.store.list_signatures()?;
        let detections = matcher::match_all(&apps, &signatures, connection.provider.as_str());

        let now = Utc::now();
        for detection in &detections {
            self.store
                .upsert_detection(caller_org, connection.id, detection, now)?;
        }

        // Bookkeeping always runs on a non-aborted path
        self.store.update_scan_bookkeeping(
            connection.id,
            now,
            now + Duration::days(self.scan_config.rescan_interval_days),
        )?;

        let outcome = ScanOutcome {
            tools_found: detections.len(),
            tools: detections
                .iter()
                .map(|d| ScanToolSummary {
                    name: d.tool_name.clone(),
                    vendor: d.vendor_name.clone(),
                    confidence: d.confidence,
                })
                .collect(),
        };

        // Audit is a side channel: log a failed write, never abort the scan
        let audit = AuditRecord::for_connection(
            caller_org,
            "system",
            connection.id,
            AuditAction::ScanCompleted,
            json!({
                "apps_observed": apps.len(),
                "tools_found": outcome.tools_found,
                "fetch_failed": fetch_failed,
            }),
        );
        if let Err(e) = self.store.append_audit(&audit) {
            warn!(connection_id = %connection.id, error = %e, "Failed to append audit record");
        }

        info!(
            connection_id = %connection.id,
            organization_id = %caller_org,
            apps_observed = apps.len(),
            tools_found = outcome.tools_found,
            fetch_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan completed"
        );

        Ok(outcome)
    }
}
