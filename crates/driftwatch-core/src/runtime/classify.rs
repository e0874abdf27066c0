// crates/driftwatch-core/src/runtime/classify.rs
// ============================================================================
// Module: Diff Engine
// Description: computeDiff and the classifier rule table (A1-G1).
// Purpose: Given two SignalEnvelopes, produce a byte-identical, sorted,
//          deduplicated EnvDiff for identical inputs.
// Dependencies: driftwatch-core::core
// ============================================================================

//! ## Overview
//! Each classifier rule is a small, single-purpose function that returns
//! `Option<Finding>`. `compute_diff` runs the full table in the documented
//! order, then validates, deduplicates, and sorts the result. Nothing here
//! performs I/O or reads the clock; determinism follows directly from that.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::json;

use crate::core::evidence::{Evidence, EvidenceSection};
use crate::core::model::{
    CfContextDiff, Change, ContentDiff, EnvDiff, Finding, FindingCategory, FindingCode,
    HeaderBuckets, HeaderDiff, HeadersSectionDiff, ProbeOutcomeDiff, ProbeResult, RedirectDiff,
    ResponseMetadata, Severity, SignalEnvelope, TimingDiff, SCHEMA_VERSION,
};

const WHITELISTED_CORE_HEADERS: &[&str] =
    &["cache-control", "content-type", "vary", "www-authenticate", "location"];

/// Computes the full, deterministic diff between two probe envelopes.
#[must_use]
pub fn compute_diff(left: &SignalEnvelope, right: &SignalEnvelope) -> EnvDiff {
    let probe = build_probe_outcome_diff(left, right);

    let (Some(left_resp), Some(right_resp)) = (left.result.response(), right.result.response())
    else {
        let finding = probe_failure_finding(&probe, left, right);
        return EnvDiff {
            schema_version: SCHEMA_VERSION,
            comparison_id: left.comparison_id.clone(),
            left_probe_id: left.probe_id.clone(),
            right_probe_id: right.probe_id.clone(),
            probe,
            status: None,
            final_url: None,
            headers: None,
            redirects: None,
            content: None,
            timing: None,
            cf: None,
            max_severity: finding.severity,
            findings: vec![finding],
        };
    };

    let status = Change::of(left_resp.status, right_resp.status);
    let final_url = Change::of(left_resp.final_url.clone(), right_resp.final_url.clone());
    let redirects = build_redirect_diff(left, right, &final_url);
    let headers = build_headers_diff(&left_resp.headers, &right_resp.headers);
    let content = build_content_diff(left_resp, right_resp, &headers);
    let timing = build_timing_diff(left, right);
    let cf = build_cf_diff(left, right);

    let mut findings = Vec::new();
    findings.extend(rule_b1_status_mismatch(&status));
    findings.extend(rule_b2_final_url_mismatch(&final_url));
    findings.extend(rule_b3_redirect_chain_changed(redirects.as_ref(), &final_url));
    findings.extend(rule_c1_auth_challenge(&headers.core));
    findings.extend(rule_c2_cors_drift(headers.access_control.as_ref()));
    findings.extend(rule_d1_cache_header_drift(&headers.core, left_resp, right_resp));
    findings.extend(rule_d2_vary_drift(&headers.core));
    let content_type_changed = rule_d3_content_type_drift(&headers.core, left_resp, right_resp);
    let normalized_content_type_equal =
        content_type_changed.as_ref().map_or(true, |f| f.severity == Severity::Info);
    findings.extend(content_type_changed);
    findings.extend(rule_d4_body_hash_drift(
        content.as_ref(),
        status.changed,
        normalized_content_type_equal,
    ));
    findings.extend(rule_d5_content_length_drift(content.as_ref(), status.changed));
    let timing_emitted = rule_e1_timing_drift(timing.as_ref());
    let timing_finding_present = timing_emitted.is_some();
    findings.extend(timing_emitted);
    findings.extend(rule_f1_cf_context_drift(cf.as_ref(), timing_finding_present));
    findings.extend(rule_g1_unknown_header_drift(&headers.core));

    let findings = post_process(findings);
    let max_severity = max_severity(&findings);

    EnvDiff {
        schema_version: SCHEMA_VERSION,
        comparison_id: left.comparison_id.clone(),
        left_probe_id: left.probe_id.clone(),
        right_probe_id: right.probe_id.clone(),
        probe,
        status: Some(status),
        final_url: Some(final_url),
        headers: Some(headers),
        redirects,
        content,
        timing,
        cf,
        findings,
        max_severity,
    }
}

// ============================================================================
// SECTION: Probe Outcome
// ============================================================================

fn build_probe_outcome_diff(left: &SignalEnvelope, right: &SignalEnvelope) -> ProbeOutcomeDiff {
    let left_ok = left.result.has_response();
    let right_ok = right.result.has_response();
    ProbeOutcomeDiff {
        left_ok,
        right_ok,
        left_error_code: left.result.error_code(),
        right_error_code: right.result.error_code(),
        outcome_changed: left_ok != right_ok,
        response_present: left_ok && right_ok,
    }
}

fn is_network_failure(probe: &ProbeOutcomeDiff, left_side: bool) -> bool {
    if probe.response_present {
        return false;
    }
    if left_side {
        probe.left_error_code.is_some()
    } else {
        probe.right_error_code.is_some()
    }
}

fn probe_failure_finding(
    probe: &ProbeOutcomeDiff,
    left: &SignalEnvelope,
    right: &SignalEnvelope,
) -> Finding {
    let left_failed = is_network_failure(probe, true);
    let right_failed = is_network_failure(probe, false);
    let mut keys = Vec::new();
    if left_failed {
        keys.push("left".to_string());
    }
    if right_failed {
        keys.push("right".to_string());
    }
    let evidence = vec![Evidence::new(EvidenceSection::Probe, keys, None)];
    let left_value = probe_side_value(&left.result);
    let right_value = probe_side_value(&right.result);
    let message = match (left_failed, right_failed) {
        (true, true) => "both sides failed to produce a response".to_string(),
        (true, false) => "left side failed to produce a response".to_string(),
        (false, true) => "right side failed to produce a response".to_string(),
        (false, false) => "probe outcome mismatch".to_string(),
    };
    Finding {
        id: Finding::compute_id(FindingCode::ProbeFailure, &evidence),
        code: FindingCode::ProbeFailure,
        category: FindingCategory::Unknown,
        severity: Severity::Critical,
        message,
        evidence,
        left_value: Some(left_value),
        right_value: Some(right_value),
        recommendations: None,
    }
}

fn probe_side_value(result: &ProbeResult) -> serde_json::Value {
    match result {
        ProbeResult::NetworkFailure { error, .. } => json!(format!("{:?}", error.code)),
        ProbeResult::Success { response, .. } | ProbeResult::ResponseError { response, .. } => {
            json!(response.status)
        }
    }
}

// ============================================================================
// SECTION: Section Builders
// ============================================================================

fn build_redirect_diff(
    left: &SignalEnvelope,
    right: &SignalEnvelope,
    final_url: &Change<String>,
) -> Option<RedirectDiff> {
    let left_chain = left.result.redirects().to_vec();
    let right_chain = right.result.redirects().to_vec();
    if left_chain.is_empty() && right_chain.is_empty() {
        return None;
    }
    let hop_count = Change::of(left_chain.len() as u32, right_chain.len() as u32);
    let chain_changed = left_chain.len() != right_chain.len()
        || left_chain
            .iter()
            .zip(right_chain.iter())
            .any(|(l, r)| !l.to_url.eq_ignore_ascii_case(&r.to_url));
    let left_final = left_chain.last().map_or_else(|| final_url.left.clone(), |h| h.to_url.clone());
    let right_final =
        right_chain.last().map_or_else(|| final_url.right.clone(), |h| h.to_url.clone());
    Some(RedirectDiff {
        left: left_chain,
        right: right_chain,
        hop_count,
        final_url_from_redirects: Some(Change::of(left_final, right_final)),
        chain_changed,
    })
}

fn diff_header_bucket(
    left: &BTreeMap<String, String>,
    right: &BTreeMap<String, String>,
) -> HeaderDiff {
    let mut diff = HeaderDiff::default();
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    for key in keys {
        match (left.get(key), right.get(key)) {
            (Some(l), Some(r)) if l == r => {
                diff.unchanged.insert(key.clone(), l.clone());
            }
            (Some(l), Some(r)) => {
                diff.changed.insert(key.clone(), Change::of(l.clone(), r.clone()));
            }
            (Some(l), None) => {
                diff.removed.insert(key.clone(), l.clone());
            }
            (None, Some(r)) => {
                diff.added.insert(key.clone(), r.clone());
            }
            (None, None) => {}
        }
    }
    diff
}

fn build_headers_diff(left: &HeaderBuckets, right: &HeaderBuckets) -> HeadersSectionDiff {
    let core = diff_header_bucket(&left.core, &right.core);
    let left_ac = left.access_control.clone().unwrap_or_default();
    let right_ac = right.access_control.clone().unwrap_or_default();
    let ac_diff = diff_header_bucket(&left_ac, &right_ac);
    let access_control = if ac_diff.is_empty() { None } else { Some(ac_diff) };
    HeadersSectionDiff { core, access_control }
}

fn build_content_diff(
    left: &ResponseMetadata,
    right: &ResponseMetadata,
    headers: &HeadersSectionDiff,
) -> Option<ContentDiff> {
    let mut diff = ContentDiff::default();
    let left_ct = left.headers.core.get("content-type");
    let right_ct = right.headers.core.get("content-type");
    if headers.core.changed.contains_key("content-type")
        || (left_ct.is_some() && right_ct.is_some())
    {
        if let (Some(l), Some(r)) = (left_ct, right_ct) {
            diff.content_type = Some(Change::of(l.clone(), r.clone()));
        }
    }
    if let (Some(l), Some(r)) = (left.content_length, right.content_length) {
        diff.content_length = Some(Change::of(l, r));
    }
    if let (Some(l), Some(r)) = (&left.body_hash, &right.body_hash) {
        diff.body_hash = Some(Change::of(l.clone(), r.clone()));
    }
    if diff.content_type.is_none() && diff.content_length.is_none() && diff.body_hash.is_none() {
        None
    } else {
        Some(diff)
    }
}

fn build_timing_diff(left: &SignalEnvelope, right: &SignalEnvelope) -> Option<TimingDiff> {
    let l = left.result.duration_ms()?;
    let r = right.result.duration_ms()?;
    let duration_ms = Change::of(l, r);
    let (min, max) = if l < r { (l, r) } else { (r, l) };
    let ratio = if min == 0 { if max == 0 { 1.0 } else { f64::INFINITY } } else { max as f64 / min as f64 };
    Some(TimingDiff { duration_ms, ratio, delta_ms: max - min })
}

fn build_cf_diff(left: &SignalEnvelope, right: &SignalEnvelope) -> Option<CfContextDiff> {
    let l = left.cf_context.as_ref()?;
    let r = right.cf_context.as_ref()?;
    Some(CfContextDiff {
        colo: opt_change(l.colo.as_ref(), r.colo.as_ref()),
        country: opt_change(l.country.as_ref(), r.country.as_ref()),
        asn: opt_change(l.asn.as_ref(), r.asn.as_ref()),
    })
}

fn opt_change(l: Option<&String>, r: Option<&String>) -> Option<Change<String>> {
    match (l, r) {
        (Some(l), Some(r)) => Some(Change::of(l.clone(), r.clone())),
        _ => None,
    }
}

// ============================================================================
// SECTION: URL Decomposition (for B2)
// ============================================================================

struct UrlParts {
    scheme: String,
    host: String,
    path: String,
    query: String,
}

fn decompose(url: &str) -> UrlParts {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let (authority, path_and_query) =
        rest.split_once(['/', '?']).map_or((rest, ""), |(a, _)| (a, &rest[a.len()..]));
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let (path, query) = path_and_query
        .split_once('?')
        .map_or((path_and_query, ""), |(p, q)| (p, q));
    UrlParts {
        scheme: scheme.to_ascii_lowercase(),
        host: host.to_ascii_lowercase(),
        path: path.to_string(),
        query: query.to_string(),
    }
}

// ============================================================================
// SECTION: Classifier Rules
// ============================================================================

fn rule_b1_status_mismatch(status: &Change<u16>) -> Option<Finding> {
    if !status.changed {
        return None;
    }
    let left_class = status.left / 100;
    let right_class = status.right / 100;
    let classes: BTreeSet<u16> = [left_class, right_class].into_iter().collect();
    let crosses_3xx = (left_class == 3) != (right_class == 3);
    let severity = if classes == BTreeSet::from([2, 4])
        || classes == BTreeSet::from([2, 5])
        || crosses_3xx
    {
        Severity::Critical
    } else {
        Severity::Warn
    };
    let evidence = vec![Evidence::new(EvidenceSection::Status, vec![], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::StatusMismatch, &evidence),
        code: FindingCode::StatusMismatch,
        category: FindingCategory::Routing,
        severity,
        message: format!("status changed from {} to {}", status.left, status.right),
        evidence,
        left_value: Some(json!(status.left)),
        right_value: Some(json!(status.right)),
        recommendations: None,
    })
}

fn rule_b2_final_url_mismatch(final_url: &Change<String>) -> Option<Finding> {
    if !final_url.changed {
        return None;
    }
    let left = decompose(&final_url.left);
    let right = decompose(&final_url.right);
    let host_diff = left.host != right.host;
    let scheme_diff = left.scheme != right.scheme;
    let path_diff = left.path != right.path;
    let query_diff = left.query != right.query;

    let severity = if host_diff {
        Severity::Critical
    } else if scheme_diff && !path_diff && !query_diff {
        Severity::Info
    } else if path_diff || query_diff {
        Severity::Warn
    } else {
        Severity::Info
    };

    let mut keys = Vec::new();
    if scheme_diff {
        keys.push("scheme".to_string());
    }
    if host_diff {
        keys.push("host".to_string());
    }
    if path_diff {
        keys.push("path".to_string());
    }
    if query_diff {
        keys.push("query".to_string());
    }
    if keys.is_empty() {
        keys.push("finalUrl".to_string());
    }
    let evidence = vec![Evidence::new(EvidenceSection::FinalUrl, keys, None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::FinalUrlMismatch, &evidence),
        code: FindingCode::FinalUrlMismatch,
        category: FindingCategory::Routing,
        severity,
        message: format!("final URL changed from {} to {}", final_url.left, final_url.right),
        evidence,
        left_value: Some(json!(final_url.left)),
        right_value: Some(json!(final_url.right)),
        recommendations: None,
    })
}

fn rule_b3_redirect_chain_changed(
    redirects: Option<&RedirectDiff>,
    final_url: &Change<String>,
) -> Option<Finding> {
    let redirects = redirects?;
    if !redirects.chain_changed && !redirects.hop_count.changed {
        return None;
    }
    let left_host = decompose(&final_url.left).host;
    let right_host = decompose(&final_url.right).host;
    let final_host_differs = left_host != right_host;
    let severity = if final_host_differs { Severity::Critical } else { Severity::Warn };

    let mut keys = Vec::new();
    if redirects.hop_count.changed {
        keys.push("hopCount".to_string());
    }
    if redirects.chain_changed {
        keys.push("chain".to_string());
    }
    if final_host_differs {
        keys.push("finalHost".to_string());
    }
    let evidence = vec![Evidence::new(EvidenceSection::Redirects, keys, None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::RedirectChainChanged, &evidence),
        code: FindingCode::RedirectChainChanged,
        category: FindingCategory::Routing,
        severity,
        message: format!(
            "redirect chain changed from {} hops to {} hops",
            redirects.hop_count.left, redirects.hop_count.right
        ),
        evidence,
        left_value: Some(json!(redirects.hop_count.left)),
        right_value: Some(json!(redirects.hop_count.right)),
        recommendations: None,
    })
}

fn rule_c1_auth_challenge(core: &HeaderDiff) -> Option<Finding> {
    const KEY: &str = "www-authenticate";
    let severity = if core.added.contains_key(KEY) || core.removed.contains_key(KEY) {
        Severity::Critical
    } else if core.changed.contains_key(KEY) {
        Severity::Warn
    } else {
        return None;
    };
    let evidence = vec![Evidence::new(EvidenceSection::Headers, vec![KEY.to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::AuthChallengePresent, &evidence),
        code: FindingCode::AuthChallengePresent,
        category: FindingCategory::Security,
        severity,
        message: "www-authenticate challenge differs between sides".to_string(),
        evidence,
        left_value: core.removed.get(KEY).or_else(|| core.changed.get(KEY).map(|c| &c.left)).cloned().map(|v| json!(v)),
        right_value: core.added.get(KEY).or_else(|| core.changed.get(KEY).map(|c| &c.right)).cloned().map(|v| json!(v)),
        recommendations: None,
    })
}

fn rule_c2_cors_drift(access_control: Option<&HeaderDiff>) -> Option<Finding> {
    let diff = access_control?;
    let mut differing: BTreeSet<String> = BTreeSet::new();
    differing.extend(diff.added.keys().cloned());
    differing.extend(diff.removed.keys().cloned());
    differing.extend(diff.changed.keys().cloned());
    if differing.is_empty() {
        return None;
    }
    let severity = if differing.contains("access-control-allow-origin") {
        Severity::Critical
    } else {
        Severity::Warn
    };
    let keys: Vec<String> = differing.into_iter().collect();
    let evidence = vec![Evidence::new(EvidenceSection::Headers, keys, None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::CorsHeaderDrift, &evidence),
        code: FindingCode::CorsHeaderDrift,
        category: FindingCategory::Security,
        severity,
        message: "CORS access-control headers differ between sides".to_string(),
        evidence,
        left_value: None,
        right_value: None,
        recommendations: None,
    })
}

fn normalize_cache_control(value: Option<&String>) -> BTreeSet<String> {
    let Some(value) = value else {
        return BTreeSet::new();
    };
    value
        .split(',')
        .filter_map(|directive| {
            let mut parts = directive.splitn(2, '=');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            let normalized = match parts.next() {
                Some(val) => format!("{name}={}", val.trim().to_ascii_lowercase()),
                None => name,
            };
            Some(normalized)
        })
        .collect()
}

fn rule_d1_cache_header_drift(
    core: &HeaderDiff,
    left: &ResponseMetadata,
    right: &ResponseMetadata,
) -> Option<Finding> {
    const KEY: &str = "cache-control";
    if !core.added.contains_key(KEY) && !core.removed.contains_key(KEY) && !core.changed.contains_key(KEY) {
        return None;
    }
    let left_set = normalize_cache_control(left.headers.core.get(KEY));
    let right_set = normalize_cache_control(right.headers.core.get(KEY));
    let severity = if left_set == right_set { Severity::Info } else { Severity::Warn };
    let evidence = vec![Evidence::new(EvidenceSection::Headers, vec![KEY.to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::CacheHeaderDrift, &evidence),
        code: FindingCode::CacheHeaderDrift,
        category: FindingCategory::Cache,
        severity,
        message: "cache-control directives differ between sides".to_string(),
        evidence,
        left_value: left.headers.core.get(KEY).cloned().map(|v| json!(v)),
        right_value: right.headers.core.get(KEY).cloned().map(|v| json!(v)),
        recommendations: None,
    })
}

fn rule_d2_vary_drift(core: &HeaderDiff) -> Option<Finding> {
    const KEY: &str = "vary";
    if !core.added.contains_key(KEY) && !core.removed.contains_key(KEY) && !core.changed.contains_key(KEY) {
        return None;
    }
    let evidence = vec![Evidence::new(EvidenceSection::Headers, vec![KEY.to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::UnknownDrift, &evidence),
        code: FindingCode::UnknownDrift,
        category: FindingCategory::Unknown,
        severity: Severity::Warn,
        message: "vary header differs between sides".to_string(),
        evidence,
        left_value: None,
        right_value: None,
        recommendations: None,
    })
}

fn normalize_content_type(value: Option<&String>) -> Option<String> {
    let value = value?;
    let normalized = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn rule_d3_content_type_drift(
    core: &HeaderDiff,
    left: &ResponseMetadata,
    right: &ResponseMetadata,
) -> Option<Finding> {
    const KEY: &str = "content-type";
    if !core.added.contains_key(KEY) && !core.removed.contains_key(KEY) && !core.changed.contains_key(KEY) {
        return None;
    }
    let left_norm = normalize_content_type(left.headers.core.get(KEY));
    let right_norm = normalize_content_type(right.headers.core.get(KEY));
    let severity = match (&left_norm, &right_norm) {
        (Some(l), Some(r)) => {
            let left_major = l.split('/').next().unwrap_or("");
            let right_major = r.split('/').next().unwrap_or("");
            if left_major != right_major {
                Severity::Critical
            } else if l != r {
                Severity::Warn
            } else {
                Severity::Info
            }
        }
        (None, None) => Severity::Info,
        _ => Severity::Warn,
    };
    let evidence = vec![Evidence::new(EvidenceSection::Content, vec![KEY.to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::ContentTypeDrift, &evidence),
        code: FindingCode::ContentTypeDrift,
        category: FindingCategory::Content,
        severity,
        message: "content-type differs between sides".to_string(),
        evidence,
        left_value: left.headers.core.get(KEY).cloned().map(|v| json!(v)),
        right_value: right.headers.core.get(KEY).cloned().map(|v| json!(v)),
        recommendations: None,
    })
}

fn rule_d4_body_hash_drift(
    content: Option<&ContentDiff>,
    status_changed: bool,
    content_type_unchanged: bool,
) -> Option<Finding> {
    let content = content?;
    let hash = content.body_hash.as_ref()?;
    if !hash.changed || status_changed || !content_type_unchanged {
        return None;
    }
    let evidence = vec![Evidence::new(EvidenceSection::Content, vec!["body-hash".to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::BodyHashDrift, &evidence),
        code: FindingCode::BodyHashDrift,
        category: FindingCategory::Content,
        severity: Severity::Critical,
        message: "body hash differs with status and content-type unchanged".to_string(),
        evidence,
        left_value: Some(json!(hash.left)),
        right_value: Some(json!(hash.right)),
        recommendations: None,
    })
}

fn rule_d5_content_length_drift(
    content: Option<&ContentDiff>,
    status_changed: bool,
) -> Option<Finding> {
    let content = content?;
    let len = content.content_length.as_ref()?;
    if !len.changed {
        return None;
    }
    let delta = len.left.abs_diff(len.right);
    let severity = if delta < 200 {
        Severity::Info
    } else if delta < 2000 {
        Severity::Warn
    } else if status_changed {
        Severity::Warn
    } else {
        Severity::Critical
    };
    let evidence =
        vec![Evidence::new(EvidenceSection::Content, vec!["content-length".to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::ContentLengthDrift, &evidence),
        code: FindingCode::ContentLengthDrift,
        category: FindingCategory::Content,
        severity,
        message: format!("content-length changed from {} to {}", len.left, len.right),
        evidence,
        left_value: Some(json!(len.left)),
        right_value: Some(json!(len.right)),
        recommendations: None,
    })
}

fn rule_e1_timing_drift(timing: Option<&TimingDiff>) -> Option<Finding> {
    let timing = timing?;
    let max = timing.duration_ms.left.max(timing.duration_ms.right);
    if max < 50 || !timing.duration_ms.changed {
        return None;
    }
    let severity = if timing.ratio >= 2.5 || timing.delta_ms >= 1000 {
        Severity::Critical
    } else if timing.ratio >= 1.5 || timing.delta_ms >= 300 {
        Severity::Warn
    } else {
        Severity::Info
    };
    let evidence = vec![Evidence::new(EvidenceSection::Timing, vec!["duration_ms".to_string()], None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::TimingDrift, &evidence),
        code: FindingCode::TimingDrift,
        category: FindingCategory::Timing,
        severity,
        message: format!(
            "duration changed from {}ms to {}ms",
            timing.duration_ms.left, timing.duration_ms.right
        ),
        evidence,
        left_value: Some(json!(timing.duration_ms.left)),
        right_value: Some(json!(timing.duration_ms.right)),
        recommendations: None,
    })
}

fn rule_f1_cf_context_drift(cf: Option<&CfContextDiff>, timing_emitted: bool) -> Option<Finding> {
    let cf = cf?;
    let mut keys = Vec::new();
    if cf.colo.as_ref().is_some_and(|c| c.changed) {
        keys.push("colo".to_string());
    }
    if cf.asn.as_ref().is_some_and(|c| c.changed) {
        keys.push("asn".to_string());
    }
    if cf.country.as_ref().is_some_and(|c| c.changed) {
        keys.push("country".to_string());
    }
    if keys.is_empty() {
        return None;
    }
    let severity = if timing_emitted { Severity::Warn } else { Severity::Info };
    let evidence = vec![Evidence::new(EvidenceSection::Cf, keys, None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::CfContextDrift, &evidence),
        code: FindingCode::CfContextDrift,
        category: FindingCategory::Platform,
        severity,
        message: "execution context (colo/asn/country) differs between sides".to_string(),
        evidence,
        left_value: None,
        right_value: None,
        recommendations: None,
    })
}

fn rule_g1_unknown_header_drift(core: &HeaderDiff) -> Option<Finding> {
    const CLAIMED: &[&str] = &["www-authenticate", "cache-control", "vary", "content-type"];
    let mut differing: BTreeSet<String> = BTreeSet::new();
    for key in WHITELISTED_CORE_HEADERS {
        if CLAIMED.contains(key) {
            continue;
        }
        if core.added.contains_key(*key) || core.removed.contains_key(*key) || core.changed.contains_key(*key) {
            differing.insert((*key).to_string());
        }
    }
    if differing.is_empty() {
        return None;
    }
    let severity = if differing.len() >= 3 { Severity::Warn } else { Severity::Info };
    let keys: Vec<String> = differing.into_iter().collect();
    let evidence = vec![Evidence::new(EvidenceSection::Headers, keys, None)];
    Some(Finding {
        id: Finding::compute_id(FindingCode::UnknownDrift, &evidence),
        code: FindingCode::UnknownDrift,
        category: FindingCategory::Unknown,
        severity,
        message: "whitelisted header differs without a more specific classification".to_string(),
        evidence,
        left_value: None,
        right_value: None,
        recommendations: None,
    })
}

// ============================================================================
// SECTION: Post-processing
// ============================================================================

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Critical => 0,
        Severity::Warn => 1,
        Severity::Info => 2,
    }
}

fn post_process(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.retain(|f| f.evidence.iter().all(Evidence::validate_keys));
    let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
    findings.retain(|f| {
        let evidence = f.evidence.first();
        let section = evidence.map(|e| e.section.as_str().to_string()).unwrap_or_default();
        let keys = evidence.map(|e| e.keys.join(",")).unwrap_or_default();
        let dedupe_key = (f.code.as_str().to_string(), section, keys);
        seen.insert(dedupe_key)
    });
    findings.sort_by(|a, b| {
        severity_rank(a.severity)
            .cmp(&severity_rank(b.severity))
            .then_with(|| a.code.as_str().cmp(b.code.as_str()))
            .then_with(|| a.message.cmp(&b.message))
    });
    findings
}

fn max_severity(findings: &[Finding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .min_by_key(|s| severity_rank(*s))
        .unwrap_or(Severity::Info)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use super::*;
    use crate::core::identifiers::{ComparisonId, PairKey, ProbeId, Side};
    use crate::core::model::{HeaderBuckets, NetworkErrorInfo, ProbeErrorCode, RedirectHop, ResponseMetadata};

    fn envelope(
        side: Side,
        result: ProbeResult,
        comparison_id: &ComparisonId,
    ) -> SignalEnvelope {
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

    fn success(status: u16, headers: &[(&str, &str)], duration_ms: u64) -> ProbeResult {
        let mut core = BTreeMap::new();
        for (k, v) in headers {
            core.insert((*k).to_string(), (*v).to_string());
        }
        ProbeResult::Success {
            response: ResponseMetadata {
                status,
                final_url: "https://example.com".to_string(),
                headers: HeaderBuckets { core, access_control: None },
                content_length: None,
                body_hash: None,
            },
            redirects: vec![],
            duration_ms,
        }
    }

    fn cid() -> ComparisonId {
        ComparisonId::generate(&PairKey::compute("https://a.example.com", "https://b.example.com"))
    }

    #[test]
    fn s1_identical_endpoints_produce_no_findings() {
        let id = cid();
        let headers = [("content-type", "application/json"), ("cache-control", "public, max-age=3600")];
        let left = envelope(Side::Left, success(200, &headers, 100), &id);
        let right = envelope(Side::Right, success(200, &headers, 100), &id);
        let diff = compute_diff(&left, &right);
        assert!(diff.findings.is_empty());
        assert_eq!(diff.max_severity, Severity::Info);
    }

    #[test]
    fn s2_status_mismatch_is_critical_without_probe_failure() {
        let id = cid();
        let left = envelope(Side::Left, success(200, &[], 50), &id);
        let right = envelope(Side::Right, success(404, &[], 50), &id);
        let diff = compute_diff(&left, &right);
        assert_eq!(diff.findings.len(), 1);
        assert_eq!(diff.findings[0].code, FindingCode::StatusMismatch);
        assert_eq!(diff.findings[0].severity, Severity::Critical);
        assert!(!diff.findings.iter().any(|f| f.code == FindingCode::ProbeFailure));
    }

    #[test]
    fn s3_cache_and_cors_drift() {
        let id = cid();
        let left_headers = [("cache-control", "public, max-age=3600")];
        let mut right_core = BTreeMap::new();
        right_core.insert("cache-control".to_string(), "no-store".to_string());
        let mut right_ac = BTreeMap::new();
        right_ac.insert("access-control-allow-origin".to_string(), "*".to_string());

        let left = envelope(Side::Left, success(200, &left_headers, 50), &id);
        let right = envelope(
            Side::Right,
            ProbeResult::Success {
                response: ResponseMetadata {
                    status: 200,
                    final_url: "https://example.com".to_string(),
                    headers: HeaderBuckets { core: right_core, access_control: Some(right_ac) },
                    content_length: None,
                    body_hash: None,
                },
                redirects: vec![],
                duration_ms: 50,
            },
            &id,
        );
        let diff = compute_diff(&left, &right);
        assert!(diff.findings.iter().any(|f| f.code == FindingCode::CacheHeaderDrift && f.severity == Severity::Warn));
        assert!(diff.findings.iter().any(|f| f.code == FindingCode::CorsHeaderDrift && f.severity == Severity::Critical));
    }

    #[test]
    fn s5_network_failure_short_circuits() {
        let id = cid();
        let left = envelope(
            Side::Left,
            ProbeResult::NetworkFailure {
                error: NetworkErrorInfo {
                    code: ProbeErrorCode::Timeout,
                    message: "timed out".to_string(),
                    details: None,
                },
                duration_ms: Some(9000),
            },
            &id,
        );
        let right = envelope(Side::Right, success(200, &[], 50), &id);
        let diff = compute_diff(&left, &right);
        assert_eq!(diff.findings.len(), 1);
        assert_eq!(diff.findings[0].code, FindingCode::ProbeFailure);
        assert_eq!(diff.findings[0].severity, Severity::Critical);
        assert_eq!(diff.findings[0].evidence[0].keys, vec!["left".to_string()]);
        assert!(diff.status.is_none());
    }

    #[test]
    fn s4_redirect_chain_drift() {
        let id = cid();
        let left = envelope(
            Side::Left,
            ProbeResult::Success {
                response: ResponseMetadata {
                    status: 200,
                    final_url: "https://example.com/landing".to_string(),
                    headers: HeaderBuckets { core: BTreeMap::new(), access_control: None },
                    content_length: None,
                    body_hash: None,
                },
                redirects: vec![RedirectHop {
                    from_url: "https://example.com/".to_string(),
                    to_url: "https://example.com/landing".to_string(),
                    status: 301,
                }],
                duration_ms: 80,
            },
            &id,
        );
        let right = envelope(
            Side::Right,
            ProbeResult::Success {
                response: ResponseMetadata {
                    status: 200,
                    final_url: "https://example.com/new-landing".to_string(),
                    headers: HeaderBuckets { core: BTreeMap::new(), access_control: None },
                    content_length: None,
                    body_hash: None,
                },
                redirects: vec![
                    RedirectHop {
                        from_url: "https://example.com/".to_string(),
                        to_url: "https://example.com/intermediate".to_string(),
                        status: 301,
                    },
                    RedirectHop {
                        from_url: "https://example.com/intermediate".to_string(),
                        to_url: "https://example.com/new-landing".to_string(),
                        status: 302,
                    },
                ],
                duration_ms: 90,
            },
            &id,
        );
        let diff = compute_diff(&left, &right);
        assert!(diff.findings.iter().any(|f| f.code == FindingCode::RedirectChainChanged));
    }

    #[test]
    fn determinism_across_repeated_runs() {
        let id = cid();
        let left = envelope(Side::Left, success(200, &[("vary", "accept")], 120), &id);
        let right = envelope(Side::Right, success(200, &[("vary", "accept-encoding")], 400), &id);
        let first = compute_diff(&left, &right);
        for _ in 0..5 {
            let again = compute_diff(&left, &right);
            assert_eq!(
                serde_json::to_string(&first).unwrap(),
                serde_json::to_string(&again).unwrap()
            );
        }
    }

    #[test]
    fn findings_are_ordered_by_severity_then_code_then_message() {
        let id = cid();
        let left = envelope(Side::Left, success(200, &[("vary", "a")], 50), &id);
        let right = envelope(Side::Right, success(404, &[("vary", "b")], 2000), &id);
        let diff = compute_diff(&left, &right);
        let ranks: Vec<u8> = diff.findings.iter().map(|f| severity_rank(f.severity)).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }
}
