//! Catalog matching for observed workspace applications.
//!
//! Pure, deterministic scoring: tiered exact/substring matching of an observed
//! application name against a [`ToolSignature`], plus a low-confidence
//! fallback for names that look AI-related but match nothing in the catalog.
//! No network or persistence concerns live here, so every tier is
//! table-testable.

use crate::catalog::ToolSignature;
use crate::provider::ObservedApp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Minimum best-signature score for a matched detection.
const MATCH_THRESHOLD: f64 = 0.5;

/// Confidence assigned to the unmatched "likely AI tool" fallback.
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Generic tokens that flag an uncataloged app as likely AI-related.
const AI_INDICATOR_TOKENS: &[&str] = &["ai", "gpt", "copilot", "claude", "gemini", "llm"];

/// One scored detection produced by a scan run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionResult {
    pub tool_name: String,
    pub vendor_name: Option<String>,
    /// Signature that produced the match; None for the heuristic fallback
    pub matched_signature_id: Option<Uuid>,
    /// Where the observation came from (provider kind tag)
    pub source: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub user_count: Option<i64>,
    /// Original observed name/identifier, for operator triage
    pub metadata: serde_json::Value,
}

/// A persisted detection row; `first_seen` is immutable once set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub result: DetectionResult,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Scores an observed application name against one signature.
///
/// Case-insensitive, highest tier wins:
/// identical 1.0; observed contains tool name 0.9; observed contains a
/// detection pattern 0.85; tool name contains observed (len > 3) 0.8; a
/// detection pattern contains observed (len > 3) 0.75; vendor containment
/// either direction 0.6; otherwise 0.0.
pub fn score(observed_name: &str, signature: &ToolSignature) -> f64 {
    let observed = observed_name.trim().to_lowercase();
    let tool = signature.tool_name.to_lowercase();
    let vendor = signature.vendor_name.to_lowercase();

    if observed.is_empty() || tool.is_empty() {
        return 0.0;
    }

    if observed == tool {
        return 1.0;
    }
    if observed.contains(&tool) {
        return 0.9;
    }

    let patterns: Vec<String> = signature
        .detection_patterns
        .iter()
        .map(|p| p.to_lowercase())
        .collect();

    if patterns.iter().any(|p| !p.is_empty() && observed.contains(p)) {
        return 0.85;
    }
    if observed.len() > 3 && tool.contains(&observed) {
        return 0.8;
    }
    if observed.len() > 3 && patterns.iter().any(|p| p.contains(&observed)) {
        return 0.75;
    }
    if !vendor.is_empty() && (observed.contains(&vendor) || vendor.contains(&observed)) {
        return 0.6;
    }

    0.0
}

/// Matches a batch of observed apps against the signature catalog.
///
/// Per app: keep the max-scoring signature. At or above 0.5 the app becomes a
/// matched detection (confidence = score). Below 0.5, a name containing one of
/// the generic AI-indicator tokens still yields a 0.3-confidence unmatched
/// detection so operators can triage tools the catalog does not know yet.
/// Everything else is dropped silently — this is a discovery aid with a
/// deliberate false-negative bias, not an exhaustive audit.
pub fn match_all(
    observed_apps: &[ObservedApp],
    signatures: &[ToolSignature],
    source: &str,
) -> Vec<DetectionResult> {
    let mut detections = Vec::new();

    for app in observed_apps {
        let best = signatures
            .iter()
            .map(|sig| (score(&app.name, sig), sig))
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        match best {
            Some((best_score, sig)) if best_score >= MATCH_THRESHOLD => {
                detections.push(DetectionResult {
                    tool_name: sig.tool_name.clone(),
                    vendor_name: Some(sig.vendor_name.clone()),
                    matched_signature_id: Some(sig.id),
                    source: source.to_string(),
                    confidence: best_score,
                    user_count: app.user_count,
                    metadata: observed_metadata(app),
                });
            }
            _ => {
                if looks_like_ai_tool(&app.name) {
                    detections.push(DetectionResult {
                        tool_name: app.name.clone(),
                        vendor_name: None,
                        matched_signature_id: None,
                        source: source.to_string(),
                        confidence: FALLBACK_CONFIDENCE,
                        user_count: app.user_count,
                        metadata: observed_metadata(app),
                    });
                }
                // Neither matched nor AI-flavored: not reported
            }
        }
    }

    detections
}

fn looks_like_ai_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    AI_INDICATOR_TOKENS.iter().any(|token| lower.contains(token))
}

fn observed_metadata(app: &ObservedApp) -> serde_json::Value {
    json!({
        "observed_name": app.name,
        "external_id": app.external_id,
    })
}
