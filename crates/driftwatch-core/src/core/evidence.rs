// crates/driftwatch-core/src/core/evidence.rs
// ============================================================================
// Module: Evidence
// Description: The typed, closed-vocabulary evidence pointer attached to
//              every finding.
// Purpose: Let a Finding name exactly what part of the diff it is about,
//          with a vocabulary the Classifier validates before emission.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An [`Evidence`] record is a pointer into the diff: a section name plus an
//! optional, closed set of keys scoped to that section. The vocabulary is
//! enforced by [`Evidence::validate_keys`], called by the Classifier as a
//! post-processing step; a validation failure there is treated as an
//! internal bug, not user error.

use serde::Deserialize;
use serde::Serialize;

/// The section of the diff an [`Evidence`] record points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSection {
    /// Points at the probe-outcome diff (network failure vs response).
    Probe,
    /// Points at the status-code diff.
    Status,
    /// Points at the final-URL diff.
    FinalUrl,
    /// Points at the header diff.
    Headers,
    /// Points at the redirect-chain diff.
    Redirects,
    /// Points at the content diff.
    Content,
    /// Points at the timing diff.
    Timing,
    /// Points at the Cloudflare-context diff.
    Cf,
}

impl EvidenceSection {
    /// Returns the lowercase wire name of this section, as used in
    /// deterministic finding ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Status => "status",
            Self::FinalUrl => "finalUrl",
            Self::Headers => "headers",
            Self::Redirects => "redirects",
            Self::Content => "content",
            Self::Timing => "timing",
            Self::Cf => "cf",
        }
    }

    /// Returns the closed key vocabulary permitted for this section, or
    /// `None` when the section accepts arbitrary lowercase header-name keys.
    #[must_use]
    pub const fn closed_vocabulary(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Probe => Some(&["left", "right"]),
            Self::Status => Some(&[]),
            Self::FinalUrl => Some(&["scheme", "host", "path", "query", "finalUrl"]),
            Self::Redirects => Some(&["hopCount", "chain", "finalHost"]),
            Self::Content => Some(&["content-type", "content-length", "body-hash"]),
            Self::Timing => Some(&["duration_ms"]),
            Self::Cf => Some(&["colo", "asn", "country"]),
            Self::Headers => None,
        }
    }
}

/// A typed pointer into the diff identifying what a finding is about.
///
/// # Invariants
/// - `keys`, when present, is lexicographically sorted and duplicate-free.
/// - Every key in `keys` belongs to the section's closed vocabulary (for
///   `headers`, keys must be lowercase and match `[a-z0-9-]+`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// The diff section this evidence points into.
    pub section: EvidenceSection,
    /// The specific keys within that section, sorted and deduplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Optional free-text annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Evidence {
    /// Builds an evidence record, sorting and deduplicating `keys`.
    #[must_use]
    pub fn new(section: EvidenceSection, mut keys: Vec<String>, note: Option<String>) -> Self {
        keys.sort_unstable();
        keys.dedup();
        Self { section, keys, note }
    }

    /// Validates that every key belongs to the section's closed vocabulary,
    /// is sorted, and is duplicate-free.
    #[must_use]
    pub fn validate_keys(&self) -> bool {
        if !self.keys.windows(2).all(|w| w[0] < w[1]) {
            return false;
        }
        match self.section.closed_vocabulary() {
            Some(allowed) => self.keys.iter().all(|k| allowed.contains(&k.as_str())),
            None => self.keys.iter().all(|k| is_valid_header_key(k)),
        }
    }
}

fn is_valid_header_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsorted_keys() {
        let ev = Evidence {
            section: EvidenceSection::FinalUrl,
            keys: vec!["path".to_string(), "host".to_string()],
            note: None,
        };
        assert!(!ev.validate_keys());
    }

    #[test]
    fn rejects_uppercase_header_keys() {
        let ev = Evidence {
            section: EvidenceSection::Headers,
            keys: vec!["Cache-Control".to_string()],
            note: None,
        };
        assert!(!ev.validate_keys());
    }

    #[test]
    fn accepts_closed_vocabulary_keys() {
        let ev = Evidence::new(
            EvidenceSection::Cf,
            vec!["asn".to_string(), "colo".to_string()],
            None,
        );
        assert!(ev.validate_keys());
    }

    #[test]
    fn rejects_keys_outside_closed_vocabulary() {
        let ev = Evidence {
            section: EvidenceSection::Status,
            keys: vec!["anything".to_string()],
            note: None,
        };
        assert!(!ev.validate_keys());
    }
}
