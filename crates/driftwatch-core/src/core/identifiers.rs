// crates/driftwatch-core/src/core/identifiers.rs
// ============================================================================
// Module: Driftwatch Identifiers
// Description: Canonical opaque identifiers for comparisons, probes, and
//              the pair fingerprint that keys per-pair storage.
// Purpose: Provide strongly typed, serializable identifiers with stable,
//          deterministic wire forms.
// Dependencies: serde, sha2, uuid
// ============================================================================

//! ## Overview
//! Identifiers here are derived deterministically from their inputs so that
//! two comparisons of the same URL pair route to the same storage instance,
//! while still carrying a random component (`comparisonId`'s UUIDv4 suffix)
//! so that concurrent comparisons of the same pair never collide.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Pair Fingerprint
// ============================================================================

/// The fingerprint that keys a pair's storage instance: SHA-256 of the two
/// URLs, sorted and joined by `|`, hex-encoded.
///
/// # Invariants
/// - Insensitive to the order `leftUrl`/`rightUrl` were supplied in.
/// - Always 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairKey(String);

impl PairKey {
    /// Computes the pair fingerprint for a left/right URL pair.
    #[must_use]
    pub fn compute(left_url: &str, right_url: &str) -> Self {
        let mut pair = [left_url, right_url];
        pair.sort_unstable();
        let joined = pair.join("|");
        let digest = Sha256::digest(joined.as_bytes());
        Self(hex_encode(&digest))
    }

    /// Returns the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 40 hex characters, the component embedded in a
    /// [`ComparisonId`].
    #[must_use]
    pub fn prefix40(&self) -> &str {
        &self.0[..40]
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Comparison Identifier
// ============================================================================

/// Comparison identifier: `${first-40-hex-of-pairKey}-${UUIDv4}`.
///
/// # Invariants
/// - Total length is at most 77 characters (40 + 1 + 36).
/// - The first 40 characters recover the originating [`PairKey`] prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComparisonId(String);

impl ComparisonId {
    /// Generates a new comparison identifier for the given pair fingerprint.
    #[must_use]
    pub fn generate(pair_key: &PairKey) -> Self {
        let id = format!("{}-{}", pair_key.prefix40(), uuid::Uuid::new_v4());
        Self(id)
    }

    /// Wraps an existing, already-formatted comparison identifier.
    ///
    /// Used when deserializing an identifier supplied by a client (e.g. a
    /// poll request path segment) rather than generating a fresh one.
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the pair-key prefix (first 40 hex characters) routed on by
    /// the gateway to select the correct per-pair store instance.
    #[must_use]
    pub fn pair_key_prefix(&self) -> &str {
        let end = self.0.len().min(40);
        &self.0[..end]
    }
}

impl fmt::Display for ComparisonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ComparisonId {
    fn from(value: &str) -> Self {
        Self::from_raw(value)
    }
}

impl From<String> for ComparisonId {
    fn from(value: String) -> Self {
        Self::from_raw(value)
    }
}

// ============================================================================
// SECTION: Probe Identifier
// ============================================================================

/// Side of a comparison: the endpoint under test was submitted as `left` or
/// `right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The left (typically staging) endpoint.
    Left,
    /// The right (typically production) endpoint.
    Right,
}

impl Side {
    /// Returns the lowercase wire label for this side.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe identifier: `${comparisonId}:${side}`.
///
/// # Invariants
/// - Deterministic from `(comparisonId, side)`; two calls with the same
///   inputs produce equal identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(String);

impl ProbeId {
    /// Derives the probe identifier for a comparison and side.
    #[must_use]
    pub fn derive(comparison_id: &ComparisonId, side: Side) -> Self {
        Self(format!("{comparison_id}:{side}"))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn hex_encode(bytes: &[u8]) -> String {
    use fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String never fails.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_insensitive() {
        let a = PairKey::compute("https://a.example.com", "https://b.example.com");
        let b = PairKey::compute("https://b.example.com", "https://a.example.com");
        assert_eq!(a, b);
    }

    #[test]
    fn pair_key_is_64_hex_chars() {
        let k = PairKey::compute("https://a.example.com", "https://b.example.com");
        assert_eq!(k.as_str().len(), 64);
        assert!(k.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn comparison_id_embeds_pair_prefix() {
        let key = PairKey::compute("https://a.example.com", "https://b.example.com");
        let id = ComparisonId::generate(&key);
        assert_eq!(id.pair_key_prefix(), key.prefix40());
        assert!(id.as_str().len() <= 77);
    }

    #[test]
    fn probe_id_is_deterministic() {
        let key = PairKey::compute("https://a.example.com", "https://b.example.com");
        let id = ComparisonId::generate(&key);
        let p1 = ProbeId::derive(&id, Side::Left);
        let p2 = ProbeId::derive(&id, Side::Left);
        assert_eq!(p1, p2);
        assert_eq!(p1.as_str(), format!("{id}:left"));
    }
}
