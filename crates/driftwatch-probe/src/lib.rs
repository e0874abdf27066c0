// crates/driftwatch-probe/src/lib.rs
// ============================================================================
// Module: Active Probe
// Description: Issues a bounded, manually-redirect-walked HTTP GET against a
//              single URL and folds the outcome into a SignalEnvelope.
// Purpose: Produce comparable evidence for one side of a comparison without
//          ever panicking or letting an exception escape the probe.
// Dependencies: driftwatch-core, reqwest (blocking), url, sha2, time
// ============================================================================

//! ## Overview
//! [`probe`] never returns an error: every failure mode — SSRF rejection,
//! DNS failure, timeout, TLS failure, a malformed redirect chain — is folded
//! into a [`driftwatch_core::ProbeResult::NetworkFailure`] inside the
//! returned envelope. Redirects are walked by hand (clients with automatic
//! redirect-following hide the information the Diff Engine needs to compare
//! redirect chains between sides), with a single [`TimeBudget`] shared across
//! every hop.

#![deny(missing_docs)]

mod budget;
mod redirect;

pub use budget::TimeBudget;

use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;
use std::time::Duration;
use std::time::Instant;

use driftwatch_core::core::url_guard::{validate_url, UrlValidation, UrlValidationOutcome};
use driftwatch_core::{
    CfContextSnapshot, ComparisonId, HeaderBuckets, NetworkErrorInfo, ProbeErrorCode, ProbeId,
    ProbeResult, RedirectHop, ResponseMetadata, Side, SignalEnvelope, SCHEMA_VERSION,
};
use redirect::{RedirectOutcome, RedirectWalker};
use sha2::Digest;
use sha2::Sha256;

const DEFAULT_TIME_BUDGET_MS: u64 = 9_000;
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;
const USER_AGENT: &str = "driftwatch-probe/0.1";

/// Everything [`probe`] needs beyond the URL itself: identifiers to stamp
/// onto the resulting envelope and the execution-context snapshot to carry
/// through for platform-level drift detection.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    /// The comparison this probe belongs to.
    pub comparison_id: ComparisonId,
    /// Which side of the comparison this probe is for.
    pub side: Side,
    /// Execution-context snapshot; `colo`/`country` default to `"LOCAL"`/`"XX"`
    /// when not supplied.
    pub cf_context: Option<CfContextSnapshot>,
    /// Wall-clock budget for the whole probe, in milliseconds. Defaults to
    /// 9,000 ms when not overridden.
    pub time_budget_ms: Option<u64>,
}

impl ProbeContext {
    /// Builds a probe context with default time budget and no execution
    /// context override.
    #[must_use]
    pub fn new(comparison_id: ComparisonId, side: Side) -> Self {
        Self { comparison_id, side, cf_context: None, time_budget_ms: None }
    }
}

/// Runs the Active Probe against `url`, never panicking and never returning
/// an error: every failure mode is folded into the returned envelope.
#[must_use]
pub fn probe(url: &str, ctx: &ProbeContext) -> SignalEnvelope {
    tracing::debug!(url, side = ?ctx.side, comparison_id = %ctx.comparison_id, "starting probe");
    let started = Instant::now();
    let budget = TimeBudget::start(ctx.time_budget_ms.unwrap_or(DEFAULT_TIME_BUDGET_MS));
    let outcome = run(url, &budget);
    let duration_ms = clamp_millis(started.elapsed());
    let result = match outcome {
        Ok(TerminalResponse::Success { response, redirects }) => {
            tracing::debug!(url, status = response.status, duration_ms, "probe succeeded");
            ProbeResult::Success { response, redirects, duration_ms }
        }
        Ok(TerminalResponse::Error { response, redirects }) => {
            tracing::debug!(url, status = response.status, duration_ms, "probe returned error response");
            ProbeResult::ResponseError { response, redirects, duration_ms }
        }
        Err(failure) => {
            tracing::warn!(url, code = ?failure.code, message = %failure.message, duration_ms, "probe failed");
            ProbeResult::NetworkFailure { error: failure.into_error_info(), duration_ms: Some(duration_ms) }
        }
    };

    SignalEnvelope {
        schema_version: SCHEMA_VERSION,
        probe_id: ProbeId::derive(&ctx.comparison_id, ctx.side),
        comparison_id: ctx.comparison_id.clone(),
        side: ctx.side,
        requested_url: url.to_string(),
        captured_at: driftwatch_core::core::time::capture_instant(driftwatch_core::core::time::now()),
        cf_context: Some(with_defaults(ctx.cf_context.clone())),
        result,
    }
}

fn with_defaults(snapshot: Option<CfContextSnapshot>) -> CfContextSnapshot {
    let mut snapshot = snapshot.unwrap_or_default();
    if snapshot.colo.is_none() {
        snapshot.colo = Some("LOCAL".to_string());
    }
    if snapshot.country.is_none() {
        snapshot.country = Some("XX".to_string());
    }
    snapshot
}

fn clamp_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// An internal, pre-envelope failure: code, message, and optional structured
/// detail, matching the shape of [`NetworkErrorInfo`] minus the duration.
#[derive(Debug)]
struct ProbeFailure {
    code: ProbeErrorCode,
    message: String,
    details: Option<serde_json::Value>,
}

impl ProbeFailure {
    fn new(code: ProbeErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn into_error_info(self) -> NetworkErrorInfo {
        NetworkErrorInfo { code: self.code, message: self.message, details: self.details }
    }

    /// Maps a URL Validator rejection to `ssrf_blocked` or `invalid_url`
    /// per the substring rule the guard itself exposes.
    fn from_validation(reason: &str) -> Self {
        let code = if UrlValidation::is_ssrf_reason(reason) {
            ProbeErrorCode::SsrfBlocked
        } else {
            ProbeErrorCode::InvalidUrl
        };
        Self::new(code, format!("url rejected: {reason}"))
            .with_details(serde_json::json!({ "reason": reason }))
    }

    /// Maps a transport-level error to a closed code by substring inspection
    /// of the platform error message.
    fn from_transport_error(err: &reqwest::Error) -> Self {
        let lower = err.to_string().to_ascii_lowercase();
        let code = if lower.contains("abort") || lower.contains("timeout") || err.is_timeout() {
            ProbeErrorCode::Timeout
        } else if lower.contains("dns") || lower.contains("enotfound") {
            ProbeErrorCode::DnsError
        } else if lower.contains("certificate") || lower.contains("tls") {
            ProbeErrorCode::TlsError
        } else {
            ProbeErrorCode::FetchError
        };
        Self::new(code, err.to_string())
    }
}

/// A terminal (non-redirect) response, classified by status but without a
/// duration yet — [`probe`] stamps the real elapsed time once `run` returns.
#[derive(Debug)]
enum TerminalResponse {
    /// A 2xx or 3xx (non-redirecting) terminal response.
    Success { response: ResponseMetadata, redirects: Vec<RedirectHop> },
    /// A 4xx or 5xx terminal response.
    Error { response: ResponseMetadata, redirects: Vec<RedirectHop> },
}

fn run(url: &str, budget: &TimeBudget) -> Result<TerminalResponse, ProbeFailure> {
    let validation = validate_url(url);
    let UrlValidationOutcome::Ok = validation.outcome else {
        let UrlValidationOutcome::Rejected { reason } = validation.outcome else {
            unreachable!("matched against Ok above")
        };
        return Err(ProbeFailure::from_validation(&reason));
    };

    let client = build_client(budget)?;
    let mut walker = RedirectWalker::new(url);

    loop {
        if !budget.should_continue() {
            return Err(ProbeFailure::new(ProbeErrorCode::Timeout, "time budget exhausted"));
        }
        let current = walker.current_url().to_string();
        revalidate_hop(&current, walker.hop_count())?;

        let response = send(&client, &current, budget)?;
        match walker.advance(&current, response)? {
            RedirectOutcome::Redirected => continue,
            RedirectOutcome::Terminal { response, status } => {
                let metadata = build_response_metadata(response, current)?;
                let redirects = walker.into_hops();
                return Ok(classify_terminal(status, metadata, redirects));
            }
        }
    }
}

/// Re-validates each hop's URL (not just the originally requested one) —
/// a redirect can legally point anywhere, including a private address.
fn revalidate_hop(url: &str, hop_count: u32) -> Result<(), ProbeFailure> {
    if hop_count > redirect::MAX_HOPS {
        return Err(ProbeFailure::new(ProbeErrorCode::FetchError, "too many redirect hops"));
    }
    let validation = validate_url(url);
    if let UrlValidationOutcome::Rejected { reason } = validation.outcome {
        return Err(ProbeFailure::from_validation(&reason));
    }
    Ok(())
}

fn build_client(budget: &TimeBudget) -> Result<reqwest::blocking::Client, ProbeFailure> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(budget.remaining())
        .build()
        .map_err(|err| ProbeFailure::new(ProbeErrorCode::FetchError, err.to_string()))
}

fn send(
    client: &reqwest::blocking::Client,
    url: &str,
    budget: &TimeBudget,
) -> Result<reqwest::blocking::Response, ProbeFailure> {
    let response = client
        .get(url)
        .timeout(budget.remaining())
        .send()
        .map_err(|err| ProbeFailure::from_transport_error(&err))?;

    // Defense in depth: re-check the peer actually connected to, now that
    // DNS has resolved, in case the hostname resolved to a private address.
    if let Some(addr) = response.remote_addr() {
        if let Some(reason) = classify_connected_ip(addr.ip()) {
            return Err(ProbeFailure::from_validation(&reason));
        }
    }
    Ok(response)
}

fn classify_connected_ip(ip: IpAddr) -> Option<String> {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_unspecified()
        }
    };
    if blocked {
        Some(format!("connected peer is a private or link-local address: {ip}"))
    } else {
        None
    }
}

fn build_response_metadata(
    response: reqwest::blocking::Response,
    requested_url: String,
) -> Result<ResponseMetadata, ProbeFailure> {
    let status = response.status().as_u16();
    let final_url = response.url().as_str().to_string();
    let final_url = if final_url.is_empty() { requested_url } else { final_url };
    let headers = extract_header_buckets(response.headers());
    let (content_length, body_hash) = read_and_hash(response)?;
    Ok(ResponseMetadata { status, final_url, headers, content_length, body_hash })
}

const WHITELISTED_CORE_HEADERS: &[&str] =
    &["cache-control", "content-type", "vary", "www-authenticate", "location"];

fn extract_header_buckets(headers: &reqwest::header::HeaderMap) -> HeaderBuckets {
    let mut core = BTreeMap::new();
    let mut access_control = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        let Ok(value) = value.to_str() else {
            continue;
        };
        if WHITELISTED_CORE_HEADERS.contains(&name.as_str()) {
            core.insert(name, value.to_string());
        } else if let Some(rest) = name.strip_prefix("access-control-") {
            access_control.insert(format!("access-control-{rest}"), value.to_string());
        }
    }
    let access_control = if access_control.is_empty() { None } else { Some(access_control) };
    HeaderBuckets { core, access_control }
}

fn read_and_hash(
    response: reqwest::blocking::Response,
) -> Result<(Option<u64>, Option<String>), ProbeFailure> {
    let expected = response.content_length();
    if let Some(len) = expected {
        if len > MAX_RESPONSE_BYTES as u64 {
            return Err(ProbeFailure::new(
                ProbeErrorCode::FetchError,
                "response exceeds the maximum allowed size",
            ));
        }
    }
    let limit = u64::try_from(MAX_RESPONSE_BYTES).unwrap_or(u64::MAX).saturating_add(1);
    let mut handle = response.take(limit);
    let mut buf = Vec::new();
    handle
        .read_to_end(&mut buf)
        .map_err(|err| ProbeFailure::new(ProbeErrorCode::FetchError, err.to_string()))?;
    if buf.len() > MAX_RESPONSE_BYTES {
        return Err(ProbeFailure::new(
            ProbeErrorCode::FetchError,
            "response exceeds the maximum allowed size",
        ));
    }
    let content_length = u64::try_from(buf.len()).ok();
    let body_hash = Some(hex_encode(&Sha256::digest(&buf)));
    Ok((content_length, body_hash))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn classify_terminal(
    status: u16,
    response: ResponseMetadata,
    redirects: Vec<RedirectHop>,
) -> TerminalResponse {
    if (200..400).contains(&status) {
        TerminalResponse::Success { response, redirects }
    } else {
        TerminalResponse::Error { response, redirects }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use super::*;

    #[test]
    fn ssrf_rejected_url_becomes_network_failure() {
        let budget = TimeBudget::start(1_000);
        let failure = run("http://127.0.0.1/", &budget).unwrap_err();
        assert_eq!(failure.code, ProbeErrorCode::SsrfBlocked);
    }

    #[test]
    fn invalid_scheme_becomes_network_failure() {
        let budget = TimeBudget::start(1_000);
        let failure = run("ftp://example.com/", &budget).unwrap_err();
        assert_eq!(failure.code, ProbeErrorCode::InvalidUrl);
    }

    #[test]
    fn probe_context_defaults_cf_context() {
        let ctx = ProbeContext::new(
            ComparisonId::generate(&driftwatch_core::PairKey::compute("a", "b")),
            Side::Left,
        );
        let envelope = probe("http://127.0.0.1/", &ctx);
        let cf = envelope.cf_context.expect("cf_context always defaulted");
        assert_eq!(cf.colo.as_deref(), Some("LOCAL"));
        assert_eq!(cf.country.as_deref(), Some("XX"));
        assert!(!envelope.result.has_response());
    }
}
