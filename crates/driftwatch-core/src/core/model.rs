// crates/driftwatch-core/src/core/model.rs
// ============================================================================
// Module: Data Model
// Description: The envelope, diff, finding, and storage record types shared
//              across the whole comparison pipeline.
// Purpose: A single, schema-versioned vocabulary so the Probe, Diff Engine,
//          Pair Store, Orchestrator, and Gateway agree on wire shapes.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! All map keys that reference HTTP header names are lowercased by the
//! producer before they ever reach these types; all arrays that participate
//! in equality or determinism (`Finding` lists, sorted header keys) are
//! sorted by the documented key before being surfaced on the wire.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::evidence::Evidence;
use crate::core::identifiers::{ComparisonId, ProbeId, Side};

/// Current schema version for [`SignalEnvelope`] and [`EnvDiff`]. Bumped
/// only on breaking wire changes.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// SECTION: Response / Redirect
// ============================================================================

/// The core, whitelisted header buckets captured from a probe response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderBuckets {
    /// Lowercased whitelisted header name -> value; sorted alphabetically
    /// when serialized via `BTreeMap`'s natural iteration order.
    pub core: BTreeMap<String, String>,
    /// Every header whose lowercased name starts with `access-control-`;
    /// omitted entirely when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_control: Option<BTreeMap<String, String>>,
}

/// The normalized shape of an HTTP response as captured by the Active
/// Probe: status, effective URL, whitelisted headers, and optional size/
/// hash metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// HTTP status code of the final (non-redirect) response.
    pub status: u16,
    /// The response's own effective URL, or the URL actually requested on
    /// the last hop when the client does not expose one.
    pub final_url: String,
    /// Whitelisted, normalized headers.
    pub headers: HeaderBuckets,
    /// `Content-Length`, when present and parseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Hex-encoded body hash (e.g. SHA-256), when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_hash: Option<String>,
}

/// One redirect hop recorded while manually walking a 3xx chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    /// The URL the hop was requested from.
    pub from_url: String,
    /// The URL the hop redirected to (resolved relative to `from_url`).
    pub to_url: String,
    /// The 3xx status code of this hop.
    pub status: u16,
}

// ============================================================================
// SECTION: Probe Result
// ============================================================================

/// Closed set of network-level failure codes. Distinct from HTTP response
/// statuses: a [`ProbeErrorCode`] means no HTTP response was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorCode {
    /// The URL failed the SSRF Guard's syntactic/scheme checks.
    InvalidUrl,
    /// DNS resolution failed.
    DnsError,
    /// The request exceeded the probe's time budget.
    Timeout,
    /// TLS/certificate negotiation failed.
    TlsError,
    /// The URL Validator rejected the target as a private/loopback/
    /// link-local address.
    SsrfBlocked,
    /// Any other fetch failure (connection reset, malformed response, a
    /// missing `Location` on a redirect hop, etc.).
    FetchError,
    /// A failure that does not fit any other code.
    UnknownError,
}

/// Details of a network-level (non-HTTP-response) probe failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkErrorInfo {
    /// The closed failure code.
    pub code: ProbeErrorCode,
    /// A short, deterministic message.
    pub message: String,
    /// Optional structured detail (e.g. the SSRF Guard's rejection reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The outcome of a single active probe. A proper sum type: callers must
/// pattern-match exhaustively rather than inspect an `ok` boolean alongside
/// optional sibling fields, which the source material's own design notes
/// flag as a sharp edge this representation avoids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeResult {
    /// A 2xx or 3xx terminal response was obtained.
    Success {
        /// The normalized response.
        response: ResponseMetadata,
        /// Any redirect hops walked before the terminal response.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        redirects: Vec<RedirectHop>,
        /// Wall-clock duration of the whole probe, in milliseconds.
        duration_ms: u64,
    },
    /// A 4xx or 5xx terminal response was obtained. Carries a response —
    /// this is not a network failure.
    ResponseError {
        /// The normalized (4xx/5xx) response.
        response: ResponseMetadata,
        /// Any redirect hops walked before the terminal response.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        redirects: Vec<RedirectHop>,
        /// Wall-clock duration of the whole probe, in milliseconds.
        duration_ms: u64,
    },
    /// No HTTP response was obtained at all.
    NetworkFailure {
        /// The closed-code failure description.
        error: NetworkErrorInfo,
        /// Wall-clock duration up to the point of failure, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

impl ProbeResult {
    /// True for [`ProbeResult::Success`] and [`ProbeResult::ResponseError`]:
    /// both carry a `response` field, as opposed to [`ProbeResult::NetworkFailure`].
    #[must_use]
    pub const fn has_response(&self) -> bool {
        !matches!(self, Self::NetworkFailure { .. })
    }

    /// Returns the response, when this result carries one.
    #[must_use]
    pub const fn response(&self) -> Option<&ResponseMetadata> {
        match self {
            Self::Success { response, .. } | Self::ResponseError { response, .. } => {
                Some(response)
            }
            Self::NetworkFailure { .. } => None,
        }
    }

    /// Returns the redirect chain, empty when this result carries none.
    #[must_use]
    pub fn redirects(&self) -> &[RedirectHop] {
        match self {
            Self::Success { redirects, .. } | Self::ResponseError { redirects, .. } => redirects,
            Self::NetworkFailure { .. } => &[],
        }
    }

    /// Returns the network error code, only set for [`ProbeResult::NetworkFailure`].
    #[must_use]
    pub const fn error_code(&self) -> Option<ProbeErrorCode> {
        match self {
            Self::NetworkFailure { error, .. } => Some(error.code),
            Self::Success { .. } | Self::ResponseError { .. } => None,
        }
    }

    /// Returns the probe duration in milliseconds, when known.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Success { duration_ms, .. } | Self::ResponseError { duration_ms, .. } => {
                Some(*duration_ms)
            }
            Self::NetworkFailure { duration_ms, .. } => *duration_ms,
        }
    }
}

// ============================================================================
// SECTION: Cloudflare Context
// ============================================================================

/// A snapshot of the execution context the probe ran under, surfaced for
/// platform-level drift detection (e.g. colo/ASN changes between runs).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CfContextSnapshot {
    /// Edge colo identifier; defaults to `"LOCAL"` when unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colo: Option<String>,
    /// Client country code; defaults to `"XX"` when unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Autonomous system number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    /// Autonomous system organization name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_organization: Option<String>,
    /// Negotiated TLS version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
    /// Negotiated HTTP protocol (e.g. `"http/1.1"`, `"h2"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_protocol: Option<String>,
}

// ============================================================================
// SECTION: Signal Envelope
// ============================================================================

/// The output of a single active probe: everything the Diff Engine needs
/// to compare this side against the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Schema version, see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// The comparison this envelope belongs to.
    pub comparison_id: ComparisonId,
    /// This envelope's own probe identifier.
    pub probe_id: ProbeId,
    /// Which side of the comparison this probe ran for.
    pub side: Side,
    /// The URL as originally requested (before any redirects).
    pub requested_url: String,
    /// ISO-8601 capture instant.
    pub captured_at: String,
    /// Execution-context snapshot, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf_context: Option<CfContextSnapshot>,
    /// The probe outcome.
    pub result: ProbeResult,
}

// ============================================================================
// SECTION: Change<T>
// ============================================================================

/// A field-wise comparison of a value that exists on both sides.
///
/// # Invariants
/// - `unchanged` sets `left == right == v` and `changed = false`.
/// - `changed` sets `left = l`, `right = r`, and `changed = true`
///   unconditionally, even if `l == r` (callers decide whether to call
///   `changed` at all; the constructor does not compare).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    /// The left-side value.
    pub left: T,
    /// The right-side value.
    pub right: T,
    /// Whether the two sides differ.
    pub changed: bool,
}

impl<T: PartialEq + Clone> Change<T> {
    /// Builds an unchanged [`Change`] from a single shared value.
    #[must_use]
    pub fn unchanged(v: T) -> Self {
        Self { left: v.clone(), right: v, changed: false }
    }

    /// Builds a [`Change`] from two values, deriving `changed` from
    /// whether they are unequal.
    #[must_use]
    pub fn of(left: T, right: T) -> Self {
        let changed = left != right;
        Self { left, right, changed }
    }
}

// ============================================================================
// SECTION: Section Diffs
// ============================================================================

/// A key-classified diff over a whitelisted bucket of headers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderDiff {
    /// Headers present only on the right side.
    pub added: BTreeMap<String, String>,
    /// Headers present only on the left side.
    pub removed: BTreeMap<String, String>,
    /// Headers present on both sides with equal values.
    pub unchanged: BTreeMap<String, String>,
    /// Headers present on both sides with differing values.
    pub changed: BTreeMap<String, Change<String>>,
}

impl HeaderDiff {
    /// True when every bucket is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.unchanged.is_empty()
            && self.changed.is_empty()
    }
}

/// Diff of the two sides' header buckets (core whitelist + `access-control-*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersSectionDiff {
    /// Diff of the core whitelisted headers.
    pub core: HeaderDiff,
    /// Diff of `access-control-*` headers, present only if non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_control: Option<HeaderDiff>,
}

/// Diff of the two sides' redirect chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectDiff {
    /// The left side's recorded chain.
    pub left: Vec<RedirectHop>,
    /// The right side's recorded chain.
    pub right: Vec<RedirectHop>,
    /// Hop count comparison.
    pub hop_count: Change<u32>,
    /// Final-URL-from-redirects comparison, when at least one side has a
    /// non-empty chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url_from_redirects: Option<Change<String>>,
    /// True iff the hop-by-hop sequence of `to_url`s differs
    /// case-insensitively.
    pub chain_changed: bool,
}

/// Diff of content-identifying response fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentDiff {
    /// Content-Type comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<Change<String>>,
    /// Content-Length comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<Change<u64>>,
    /// Body-hash comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_hash: Option<Change<String>>,
}

/// Diff of probe timing, with derived ratio and delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingDiff {
    /// Duration comparison, in milliseconds.
    pub duration_ms: Change<u64>,
    /// `max(duration) / min(duration)`.
    pub ratio: f64,
    /// `max(duration) - min(duration)`, in milliseconds.
    pub delta_ms: u64,
}

/// Diff of the execution-context snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CfContextDiff {
    /// Colo comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colo: Option<Change<String>>,
    /// Country comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Change<String>>,
    /// ASN comparison, present only when both sides provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<Change<String>>,
}

/// Whether each side succeeded and whether the set of sides that have an
/// HTTP response agrees. `response_present` is the sole discriminator
/// downstream code uses to decide whether response-level sections were
/// computed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcomeDiff {
    /// True when the left side carries a response (success or HTTP error).
    pub left_ok: bool,
    /// True when the right side carries a response (success or HTTP error).
    pub right_ok: bool,
    /// The left side's network error code, set only when the left side is
    /// a `NetworkFailure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_error_code: Option<ProbeErrorCode>,
    /// The right side's network error code, set only when the right side
    /// is a `NetworkFailure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_error_code: Option<ProbeErrorCode>,
    /// True when `left_ok != right_ok`.
    pub outcome_changed: bool,
    /// True iff both sides carry a response, i.e. neither is a
    /// `NetworkFailure`.
    pub response_present: bool,
}

// ============================================================================
// SECTION: Findings
// ============================================================================

/// Severity of a classified finding, ordered `critical > warn > info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; no action implied.
    Info,
    /// Worth reviewing but not necessarily a regression.
    Warn,
    /// Likely indicates a real regression or security issue.
    Critical,
}

/// The functional area a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Status/URL/redirect drift.
    Routing,
    /// Auth/CORS drift.
    Security,
    /// Cache-control drift.
    Cache,
    /// Content-type/length/hash drift.
    Content,
    /// Duration drift.
    Timing,
    /// Execution-context (colo/ASN/country) drift.
    Platform,
    /// Drift that does not fit another category (e.g. `vary`, unclaimed
    /// whitelisted headers, or probe-level failure).
    Unknown,
}

/// The closed set of finding codes (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCode {
    /// One or both sides failed to produce an HTTP response at all.
    ProbeFailure,
    /// The two sides' status codes differ.
    StatusMismatch,
    /// The two sides' final URLs differ.
    FinalUrlMismatch,
    /// The redirect chain's hop count or sequence changed.
    RedirectChainChanged,
    /// `www-authenticate` presence differs, or differs in value.
    AuthChallengePresent,
    /// An `access-control-*` header differs.
    CorsHeaderDrift,
    /// The `cache-control` directive set differs.
    CacheHeaderDrift,
    /// The normalized `content-type` differs.
    ContentTypeDrift,
    /// The body hash differs with status and content-type unchanged.
    BodyHashDrift,
    /// The content length differs.
    ContentLengthDrift,
    /// Probe duration differs beyond threshold.
    TimingDrift,
    /// Execution-context (colo/ASN/country) differs.
    CfContextDrift,
    /// A whitelisted header or `vary` differs without a more specific code.
    UnknownDrift,
}

/// One classified drift instance.
///
/// # Invariants
/// - `id` is deterministic: `${code}:${section}:${sortedKeys,}`.
/// - `evidence` entries all pass [`Evidence::validate_keys`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Deterministic finding identifier.
    pub id: String,
    /// The closed finding code.
    pub code: FindingCode,
    /// The functional category.
    pub category: FindingCategory,
    /// The severity.
    pub severity: Severity,
    /// A short, deterministic human-readable message.
    pub message: String,
    /// Evidence pointing at the underlying diff section(s)/key(s).
    pub evidence: Vec<Evidence>,
    /// The left-side value implicated, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_value: Option<serde_json::Value>,
    /// The right-side value implicated, when relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_value: Option<serde_json::Value>,
    /// Optional suggested follow-ups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

impl FindingCode {
    /// Returns the `SCREAMING_SNAKE_CASE` wire name of this code, as used
    /// in deterministic finding ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProbeFailure => "PROBE_FAILURE",
            Self::StatusMismatch => "STATUS_MISMATCH",
            Self::FinalUrlMismatch => "FINAL_URL_MISMATCH",
            Self::RedirectChainChanged => "REDIRECT_CHAIN_CHANGED",
            Self::AuthChallengePresent => "AUTH_CHALLENGE_PRESENT",
            Self::CorsHeaderDrift => "CORS_HEADER_DRIFT",
            Self::CacheHeaderDrift => "CACHE_HEADER_DRIFT",
            Self::ContentTypeDrift => "CONTENT_TYPE_DRIFT",
            Self::BodyHashDrift => "BODY_HASH_DRIFT",
            Self::ContentLengthDrift => "CONTENT_LENGTH_DRIFT",
            Self::TimingDrift => "TIMING_DRIFT",
            Self::CfContextDrift => "CF_CONTEXT_DRIFT",
            Self::UnknownDrift => "UNKNOWN_DRIFT",
        }
    }
}

impl Finding {
    /// Computes the deterministic finding id from its code, evidence
    /// section, and sorted evidence keys: `${code}:${section}:${sortedKeys,}`.
    #[must_use]
    pub fn compute_id(code: FindingCode, evidence: &[Evidence]) -> String {
        let section = evidence.first().map(|e| e.section.as_str()).unwrap_or_default();
        let keys: Vec<&str> =
            evidence.first().map(|e| e.keys.iter().map(String::as_str).collect()).unwrap_or_default();
        format!("{}:{section}:{}", code.as_str(), keys.join(","))
    }
}

// ============================================================================
// SECTION: EnvDiff
// ============================================================================

/// The full, deterministic output of the Diff Engine for one comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvDiff {
    /// Schema version, see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// The comparison this diff was computed for.
    pub comparison_id: ComparisonId,
    /// The left probe's identifier.
    pub left_probe_id: ProbeId,
    /// The right probe's identifier.
    pub right_probe_id: ProbeId,
    /// Probe-outcome agreement.
    pub probe: ProbeOutcomeDiff,
    /// Status-code diff, present only when `probe.response_present`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Change<u16>>,
    /// Final-URL diff, present only when `probe.response_present`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<Change<String>>,
    /// Header diffs, present only when `probe.response_present` and at
    /// least one bucket is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeadersSectionDiff>,
    /// Redirect diff, present iff either side recorded a non-empty chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirects: Option<RedirectDiff>,
    /// Content diff, present only when underlying fields exist on both
    /// sides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentDiff>,
    /// Timing diff, present only when `probe.response_present`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDiff>,
    /// Execution-context diff, present only when both sides supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cf: Option<CfContextDiff>,
    /// Findings, sorted by severity then code then message.
    pub findings: Vec<Finding>,
    /// The maximum severity across all findings (`info` if none).
    pub max_severity: Severity,
}

// ============================================================================
// SECTION: Storage Records
// ============================================================================

/// The closed set of HTTP-facing error codes (§6.2), also used for
/// stored comparison failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareErrorCode {
    /// A required field was missing from the request.
    InvalidRequest,
    /// A URL failed to parse, or used a disallowed scheme.
    InvalidUrl,
    /// A URL was rejected by the SSRF Guard.
    SsrfBlocked,
    /// A probe or LLM call exceeded its time budget.
    Timeout,
    /// DNS resolution failed.
    DnsError,
    /// TLS negotiation failed.
    TlsError,
    /// Any other fetch failure.
    FetchError,
    /// An unexpected internal failure.
    InternalError,
}

impl From<ProbeErrorCode> for CompareErrorCode {
    fn from(code: ProbeErrorCode) -> Self {
        match code {
            ProbeErrorCode::InvalidUrl => Self::InvalidUrl,
            ProbeErrorCode::DnsError => Self::DnsError,
            ProbeErrorCode::Timeout => Self::Timeout,
            ProbeErrorCode::TlsError => Self::TlsError,
            ProbeErrorCode::SsrfBlocked => Self::SsrfBlocked,
            ProbeErrorCode::FetchError | ProbeErrorCode::UnknownError => Self::FetchError,
        }
    }
}

/// The stored shape of a comparison-level error: `{code, message}`, never a
/// raw stack trace or platform error string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredError {
    /// The closed error code.
    pub code: CompareErrorCode,
    /// A short, user-facing message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The lifecycle state of a stored [`Comparison`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// The Orchestrator has started but not yet finished this comparison.
    Running,
    /// The comparison finished successfully; `result` is set.
    Completed,
    /// The comparison terminated with an unrecovered failure; `error` is
    /// set.
    Failed,
}

/// A stored comparison record, as persisted by the Pair Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// The comparison identifier.
    pub id: ComparisonId,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// The originally requested left URL.
    pub left_url: String,
    /// The originally requested right URL.
    pub right_url: String,
    /// The current lifecycle status.
    pub status: ComparisonStatus,
    /// The serialized result payload, set only when `status = completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The failure detail, set only when `status = failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoredError>,
}

/// A stored probe record, as persisted by the Pair Store. `UNIQUE(comparison_id, side)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// The probe identifier, `${comparisonId}:${side}`.
    pub id: ProbeId,
    /// The owning comparison.
    pub comparison_id: ComparisonId,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Which side this probe ran for.
    pub side: Side,
    /// The response's `final_url` if a response is present, else the
    /// originally requested URL.
    pub url: String,
    /// The full captured envelope.
    pub envelope: SignalEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_unchanged_has_equal_sides() {
        let c = Change::unchanged(200u16);
        assert_eq!(c.left, c.right);
        assert!(!c.changed);
    }

    #[test]
    fn change_of_detects_equal_values() {
        let c = Change::of(200u16, 200u16);
        assert!(!c.changed);
        let d = Change::of(200u16, 404u16);
        assert!(d.changed);
    }

    #[test]
    fn probe_result_response_presence() {
        let success = ProbeResult::Success {
            response: ResponseMetadata {
                status: 200,
                final_url: "https://example.com".to_string(),
                headers: HeaderBuckets::default(),
                content_length: None,
                body_hash: None,
            },
            redirects: vec![],
            duration_ms: 10,
        };
        assert!(success.has_response());

        let failure = ProbeResult::NetworkFailure {
            error: NetworkErrorInfo {
                code: ProbeErrorCode::Timeout,
                message: "timed out".to_string(),
                details: None,
            },
            duration_ms: Some(9000),
        };
        assert!(!failure.has_response());
        assert_eq!(failure.error_code(), Some(ProbeErrorCode::Timeout));
    }
}
