// crates/driftwatch-core/src/lib.rs
// ============================================================================
// Module: Driftwatch Core
// Description: Data model, identifiers, the URL Validator (SSRF Guard), and
//              the deterministic Diff Engine shared by every other crate.
// Purpose: Pure, dependency-light substrate for the comparison pipeline.
// Dependencies: serde, serde_json, sha2, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! `driftwatch-core` carries the parts of the comparison pipeline that are
//! pure functions of their inputs: identifiers, the envelope/diff data
//! model, SSRF-hardened URL validation, and the deterministic classifier
//! that turns two envelopes into a sorted, deduplicated list of findings.
//! Nothing in this crate performs I/O.

#![deny(missing_docs)]

pub mod core;
pub mod runtime;

pub use core::evidence::{Evidence, EvidenceSection};
pub use core::identifiers::{ComparisonId, PairKey, ProbeId, Side};
pub use core::model::{
    CfContextDiff, CfContextSnapshot, Change, Comparison, CompareErrorCode, ComparisonStatus,
    ContentDiff, EnvDiff, Finding, FindingCategory, FindingCode, HeaderBuckets, HeaderDiff,
    HeadersSectionDiff, NetworkErrorInfo, ProbeErrorCode, ProbeOutcomeDiff, ProbeRecord,
    ProbeResult, RedirectDiff, RedirectHop, ResponseMetadata, Severity, SignalEnvelope,
    StoredError, TimingDiff, SCHEMA_VERSION,
};
pub use core::time::{capture_instant, epoch_millis, now};
pub use core::url_guard::{validate_url, UrlValidation, UrlValidationOutcome};
pub use runtime::classify::compute_diff;
