//! Known AI-tool signature catalog.
//!
//! Reference data for the matcher: each signature names a tool, its vendor,
//! and the literal substrings that identify it in a workspace app listing.
//! Signatures are immutable within a scan; the built-in table below seeds the
//! store so a fresh deployment detects the common tools without any manual
//! catalog loading.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One catalog entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSignature {
    pub id: Uuid,
    pub tool_name: String,
    pub vendor_name: String,
    /// Literal substrings that identify the tool in an observed app name
    pub detection_patterns: Vec<String>,
    /// Whether the entry has been vetted (vs. operator-submitted)
    pub confirmed: bool,
}

struct BuiltinSignature {
    tool_name: &'static str,
    vendor_name: &'static str,
    detection_patterns: &'static [&'static str],
}

const BUILTIN_SIGNATURES: &[BuiltinSignature] = &[
    BuiltinSignature {
        tool_name: "ChatGPT",
        vendor_name: "OpenAI",
        detection_patterns: &["chatgpt", "chat.openai", "openai"],
    },
    BuiltinSignature {
        tool_name: "Claude",
        vendor_name: "Anthropic",
        detection_patterns: &["claude", "anthropic"],
    },
    BuiltinSignature {
        tool_name: "Gemini",
        vendor_name: "Google",
        detection_patterns: &["gemini", "bard"],
    },
    BuiltinSignature {
        tool_name: "GitHub Copilot",
        vendor_name: "GitHub",
        detection_patterns: &["copilot"],
    },
    BuiltinSignature {
        tool_name: "Microsoft 365 Copilot",
        vendor_name: "Microsoft",
        detection_patterns: &["m365 copilot", "microsoft copilot"],
    },
    BuiltinSignature {
        tool_name: "Perplexity",
        vendor_name: "Perplexity AI",
        detection_patterns: &["perplexity"],
    },
    BuiltinSignature {
        tool_name: "Midjourney",
        vendor_name: "Midjourney",
        detection_patterns: &["midjourney"],
    },
    BuiltinSignature {
        tool_name: "Jasper",
        vendor_name: "Jasper AI",
        detection_patterns: &["jasper"],
    },
    BuiltinSignature {
        tool_name: "Notion AI",
        vendor_name: "Notion",
        detection_patterns: &["notion ai"],
    },
    BuiltinSignature {
        tool_name: "Grammarly",
        vendor_name: "Grammarly",
        detection_patterns: &["grammarly"],
    },
    BuiltinSignature {
        tool_name: "Otter.ai",
        vendor_name: "Otter.ai",
        detection_patterns: &["otter.ai", "otter ai"],
    },
    BuiltinSignature {
        tool_name: "Cursor",
        vendor_name: "Anysphere",
        detection_patterns: &["cursor", "anysphere"],
    },
    BuiltinSignature {
        tool_name: "DALL-E",
        vendor_name: "OpenAI",
        detection_patterns: &["dall-e", "dalle"],
    },
    BuiltinSignature {
        tool_name: "Fireflies.ai",
        vendor_name: "Fireflies",
        detection_patterns: &["fireflies"],
    },
    BuiltinSignature {
        tool_name: "Synthesia",
        vendor_name: "Synthesia",
        detection_patterns: &["synthesia"],
    },
];

/// Materializes the built-in catalog with fresh ids.
///
/// Used to seed the store on first startup; existing rows take precedence.
pub fn builtin_signatures() -> Vec<ToolSignature> {
    BUILTIN_SIGNATURES
        .iter()
        .map(|s| ToolSignature {
            id: Uuid::new_v4(),
            tool_name: s.tool_name.to_string(),
            vendor_name: s.vendor_name.to_string(),
            detection_patterns: s.detection_patterns.iter().map(|p| p.to_string()).collect(),
            confirmed: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_well_formed() {
        let sigs = builtin_signatures();
        assert!(!sigs.is_empty());

        for sig in &sigs {
            assert!(!sig.tool_name.is_empty());
            assert!(!sig.vendor_name.is_empty());
            assert!(!sig.detection_patterns.is_empty());
            assert!(sig.confirmed);
            // Patterns are stored lowercase so matching stays cheap
            for p in &sig.detection_patterns {
                assert_eq!(p, &p.to_lowercase());
            }
        }
    }

    #[test]
    fn test_builtin_tool_names_unique() {
        let sigs = builtin_signatures();
        let mut names: Vec<&str> = sigs.iter().map(|s| s.tool_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), sigs.len());
    }
}
