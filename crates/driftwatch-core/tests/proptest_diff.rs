// crates/driftwatch-core/tests/proptest_diff.rs
// ============================================================================
// Module: Diff Engine Property-Based Tests
// Description: Property tests for determinism, ordering, deduplication, and
//              evidence-vocabulary invariants of computeDiff/classify.
// Purpose: Detect panics and invariant violations across wide input ranges.
// ============================================================================

//! Property-based tests for the Diff Engine's closed-vocabulary invariants.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;

use driftwatch_core::ComparisonId;
use driftwatch_core::HeaderBuckets;
use driftwatch_core::NetworkErrorInfo;
use driftwatch_core::PairKey;
use driftwatch_core::ProbeErrorCode;
use driftwatch_core::ProbeId;
use driftwatch_core::ProbeResult;
use driftwatch_core::ResponseMetadata;
use driftwatch_core::SCHEMA_VERSION;
use driftwatch_core::Side;
use driftwatch_core::SignalEnvelope;
use driftwatch_core::compute_diff;
use proptest::prelude::*;

fn comparison_id() -> ComparisonId {
    ComparisonId::generate(&PairKey::compute("https://a.example.com", "https://b.example.com"))
}

fn envelope(side: Side, comparison_id: &ComparisonId, result: ProbeResult) -> SignalEnvelope {
    SignalEnvelope {
        schema_version: SCHEMA_VERSION,
        comparison_id: comparison_id.clone(),
        probe_id: ProbeId::derive(comparison_id, side),
        side,
        requested_url: "https://example.com".to_string(),
        captured_at: "2024-01-01T00:00:00Z".to_string(),
        cf_context: None,
        result,
    }
}

fn success_result(status: u16, headers: &BTreeMap<String, String>, duration_ms: u64) -> ProbeResult {
    ProbeResult::Success {
        response: ResponseMetadata {
            status,
            final_url: "https://example.com".to_string(),
            headers: HeaderBuckets { core: headers.clone(), access_control: None },
            content_length: None,
            body_hash: None,
        },
        redirects: vec![],
        duration_ms,
    }
}

fn network_failure(duration_ms: Option<u64>) -> ProbeResult {
    ProbeResult::NetworkFailure {
        error: NetworkErrorInfo { code: ProbeErrorCode::Timeout, message: "timed out".to_string(), details: None },
        duration_ms,
    }
}

fn header_map_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9-]{0,12}", "[ -~]{0,24}", 0..6)
}

fn probe_result_strategy() -> impl Strategy<Value = ProbeResult> {
    prop_oneof![
        (100u16..600, header_map_strategy(), 0u64..30_000)
            .prop_map(|(status, headers, duration)| success_result(status, &headers, duration)),
        prop::option::of(0u64..30_000).prop_map(network_failure),
    ]
}

proptest! {
    #[test]
    fn compute_diff_is_deterministic(left in probe_result_strategy(), right in probe_result_strategy()) {
        let id = comparison_id();
        let left_env = envelope(Side::Left, &id, left);
        let right_env = envelope(Side::Right, &id, right);

        let first = compute_diff(&left_env, &right_env);
        for _ in 0..5 {
            let again = compute_diff(&left_env, &right_env);
            prop_assert_eq!(
                serde_json::to_string(&first).unwrap(),
                serde_json::to_string(&again).unwrap()
            );
        }
    }

    #[test]
    fn findings_are_non_decreasing_by_severity_then_code_then_message(
        left in probe_result_strategy(),
        right in probe_result_strategy(),
    ) {
        let id = comparison_id();
        let left_env = envelope(Side::Left, &id, left);
        let right_env = envelope(Side::Right, &id, right);
        let diff = compute_diff(&left_env, &right_env);

        let keys: Vec<(u8, &'static str, String)> = diff
            .findings
            .iter()
            .map(|f| (severity_rank(f.severity), f.code.as_str(), f.message.clone()))
            .collect();
        prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn findings_have_no_duplicate_code_section_keys(
        left in probe_result_strategy(),
        right in probe_result_strategy(),
    ) {
        let id = comparison_id();
        let left_env = envelope(Side::Left, &id, left);
        let right_env = envelope(Side::Right, &id, right);
        let diff = compute_diff(&left_env, &right_env);

        let mut seen = std::collections::BTreeSet::new();
        for finding in &diff.findings {
            let evidence = finding.evidence.first();
            let section = evidence.map(|e| e.section.as_str()).unwrap_or_default();
            let sorted_keys = evidence.map(|e| e.keys.join(",")).unwrap_or_default();
            let dedupe_key = (finding.code.as_str(), section, sorted_keys);
            prop_assert!(!seen.contains(&dedupe_key), "duplicate finding key: {:?}", dedupe_key);
            seen.insert(dedupe_key);
        }
    }

    #[test]
    fn every_emitted_evidence_record_has_valid_keys(
        left in probe_result_strategy(),
        right in probe_result_strategy(),
    ) {
        let id = comparison_id();
        let left_env = envelope(Side::Left, &id, left);
        let right_env = envelope(Side::Right, &id, right);
        let diff = compute_diff(&left_env, &right_env);

        for finding in &diff.findings {
            for evidence in &finding.evidence {
                prop_assert!(evidence.validate_keys(), "invalid evidence: {:?}", evidence);
            }
        }
    }

    #[test]
    fn pair_key_hash_is_order_insensitive(left in "https?://[a-z]{1,12}\\.example\\.com", right in "https?://[a-z]{1,12}\\.example\\.com") {
        let forward = PairKey::compute(&left, &right);
        let backward = PairKey::compute(&right, &left);
        prop_assert_eq!(forward.as_str(), backward.as_str());
    }
}

fn severity_rank(severity: driftwatch_core::Severity) -> u8 {
    match severity {
        driftwatch_core::Severity::Critical => 0,
        driftwatch_core::Severity::Warn => 1,
        driftwatch_core::Severity::Info => 2,
    }
}
