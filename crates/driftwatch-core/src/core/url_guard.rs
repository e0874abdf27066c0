// crates/driftwatch-core/src/core/url_guard.rs
// ============================================================================
// Module: URL Validator (SSRF Guard)
// Description: Pure function from a URL string to {ok} or {rejected, reason}.
// Purpose: Shared gate used by both the Gateway (request validation) and the
//          Active Probe (defense in depth, re-checked after DNS resolution).
// Dependencies: none (parsing is hand-rolled; see note below)
// ============================================================================

//! ## Overview
//! This module intentionally does not depend on a URL-parsing crate: the
//! rejection rules operate on the raw hostname string (to catch
//! numeric-encoding bypasses *before* any normalization a parser might
//! apply), and the accepted grammar is narrow enough that a small hand
//! parser is clearer than threading crate-specific URL types through the
//! rule table. `driftwatch-probe` additionally re-validates resolved IPs
//! after DNS lookup, which does use `url::Url` for request construction.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

/// The result of validating a URL against the SSRF Guard's rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationOutcome {
    /// The URL passed every rule.
    Ok,
    /// The URL was rejected, with a human-readable reason. Callers map the
    /// reason to `ssrf_blocked` or `invalid_url` via [`UrlValidation::is_ssrf_reason`].
    Rejected {
        /// Why the URL was rejected.
        reason: String,
    },
}

/// A validated URL, or the rejection reason, plus the parsed hostname when
/// parsing succeeded far enough to extract one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlValidation {
    /// The validation outcome.
    pub outcome: UrlValidationOutcome,
}

impl UrlValidation {
    /// True when the outcome is [`UrlValidationOutcome::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.outcome, UrlValidationOutcome::Ok)
    }

    /// Classifies a rejection reason as an SSRF block (vs. a plain
    /// malformed-URL rejection), per the substring rule in spec §4.1: any
    /// reason mentioning localhost/loopback/private/link-local/blocked/
    /// any-address/ipv6-mapped maps to `ssrf_blocked`; others map to
    /// `invalid_url`.
    #[must_use]
    pub fn is_ssrf_reason(reason: &str) -> bool {
        const SSRF_MARKERS: &[&str] = &[
            "localhost",
            "loopback",
            "private",
            "link-local",
            "blocked",
            "any-address",
            "ipv6-mapped",
        ];
        SSRF_MARKERS.iter().any(|marker| reason.contains(marker))
    }
}

/// Validates a URL per the SSRF Guard's rule table (spec §4.1), evaluated
/// in order; the first matching rule wins.
#[must_use]
pub fn validate_url(raw: &str) -> UrlValidation {
    let outcome = validate_inner(raw);
    UrlValidation { outcome }
}

fn reject(reason: impl Into<String>) -> UrlValidationOutcome {
    UrlValidationOutcome::Rejected { reason: reason.into() }
}

fn validate_inner(raw: &str) -> UrlValidationOutcome {
    // Rule 1: parseable, scheme in {http, https}.
    let Some((scheme, rest)) = split_scheme(raw) else {
        return reject("could not parse URL");
    };
    if scheme != "http" && scheme != "https" {
        return reject(format!("unsupported scheme: {scheme}"));
    }
    let Some(host) = extract_host(rest) else {
        return reject("could not parse URL: missing host");
    };

    // Rule 2: numeric-encoded hostname, a classic SSRF bypass.
    if is_numeric_encoded_hostname(&host) {
        return reject("numeric-encoded hostname blocked as a possible SSRF bypass");
    }

    // Rule 3: exact hostname denylist.
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    const EXACT_DENYLIST: &[&str] = &[
        "localhost",
        "localhost.localdomain",
        "::1",
        "[::1]",
        "0:0:0:0:0:0:0:1",
    ];
    if EXACT_DENYLIST.contains(&normalized.as_str()) {
        return reject(format!("hostname is a localhost/loopback alias: {normalized}"));
    }

    // Rule 4/5: literal IP addresses against the denylisted ranges.
    let bare = host.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(&host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if let Some(reason) = classify_denylisted_ip(ip) {
            return reject(reason);
        }
    }

    UrlValidationOutcome::Ok
}

/// Splits `scheme://rest` into its two halves.
fn split_scheme(raw: &str) -> Option<(&str, &str)> {
    let idx = raw.find("://")?;
    let scheme = &raw[..idx];
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((scheme, &raw[idx + 3..]))
}

/// Extracts the host component from `user:pass@host:port/path?query`,
/// preserving IPv6 bracket notation.
fn extract_host(authority_and_path: &str) -> Option<String> {
    let authority = authority_and_path.split(['/', '?', '#']).next()?;
    let after_userinfo = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    if after_userinfo.is_empty() {
        return None;
    }
    if let Some(rest) = after_userinfo.strip_prefix('[') {
        let end = rest.find(']')?;
        return Some(format!("[{}]", &rest[..end]));
    }
    let host = after_userinfo.split(':').next().unwrap_or(after_userinfo);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// True when `host` is a numeric-encoded bypass attempt: wholly decimal
/// digits, a `0x`/`0X` hex-prefixed literal, or an octal form `0[0-7]+`.
fn is_numeric_encoded_hostname(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if host.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = host.to_ascii_lowercase();
    if let Some(hex_digits) = lower.strip_prefix("0x") {
        return !hex_digits.is_empty() && hex_digits.chars().all(|c| c.is_ascii_hexdigit());
    }
    if let Some(rest) = host.strip_prefix('0') {
        return !rest.is_empty() && rest.chars().all(|c| ('0'..='7').contains(&c));
    }
    false
}

/// Classifies a literal IP against the denylisted ranges, returning a
/// rejection reason when it matches one.
fn classify_denylisted_ip(ip: IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(v4) => classify_denylisted_v4(v4),
        IpAddr::V6(v6) => classify_denylisted_v6(v6),
    }
}

fn classify_denylisted_v4(addr: Ipv4Addr) -> Option<String> {
    let octets = addr.octets();
    if octets[0] == 0 {
        return Some("IPv4 address in the any-address range 0.0.0.0/8".to_string());
    }
    if octets[0] == 127 {
        return Some("IPv4 address in the loopback range 127.0.0.0/8".to_string());
    }
    if octets[0] == 10 {
        return Some("IPv4 address in the private range 10.0.0.0/8".to_string());
    }
    if octets[0] == 172 && (16..=31).contains(&octets[1]) {
        return Some("IPv4 address in the private range 172.16.0.0/12".to_string());
    }
    if octets[0] == 192 && octets[1] == 168 {
        return Some("IPv4 address in the private range 192.168.0.0/16".to_string());
    }
    if octets[0] == 169 && octets[1] == 254 {
        return Some("IPv4 address in the link-local range 169.254.0.0/16".to_string());
    }
    None
}

fn classify_denylisted_v6(addr: Ipv6Addr) -> Option<String> {
    if addr == Ipv6Addr::LOCALHOST {
        return Some("IPv6 address is the loopback address ::1/128".to_string());
    }
    let segments = addr.segments();
    if segments[0] & 0xffc0 == 0xfe80 {
        return Some("IPv6 address in the link-local range fe80::/10".to_string());
    }
    // Rule 6: IPv4-mapped IPv6, decoded and re-checked against the v4 ranges.
    if let Some(mapped) = addr.to_ipv4_mapped() {
        if let Some(reason) = classify_denylisted_v4(mapped) {
            return Some(format!("ipv6-mapped address decodes to a blocked range: {reason}"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_blocked(url: &str) {
        let v = validate_url(url);
        match v.outcome {
            UrlValidationOutcome::Rejected { .. } => {}
            UrlValidationOutcome::Ok => panic!("expected {url} to be rejected"),
        }
    }

    fn assert_ok(url: &str) {
        let v = validate_url(url);
        assert!(v.is_ok(), "expected {url} to be accepted, got {:?}", v.outcome);
    }

    #[test]
    fn rejects_bad_scheme() {
        assert_blocked("ftp://example.com");
        assert_blocked("not a url");
    }

    #[test]
    fn rejects_numeric_encoded_hosts() {
        assert_blocked("http://2130706433/");
        assert_blocked("http://0x7f000001/");
        assert_blocked("http://017700000001/");
    }

    #[test]
    fn rejects_localhost_aliases() {
        assert_blocked("http://localhost/");
        assert_blocked("http://localhost.localdomain/");
        assert_blocked("http://[::1]/");
    }

    #[test]
    fn rejects_private_and_loopback_v4() {
        assert_blocked("http://127.0.0.1/");
        assert_blocked("http://10.0.0.5/");
        assert_blocked("http://172.16.0.1/");
        assert_blocked("http://192.168.1.1/");
        assert_blocked("http://169.254.1.1/");
        assert_blocked("http://0.0.0.0/");
    }

    #[test]
    fn rejects_ipv6_loopback_and_link_local() {
        assert_blocked("http://[::1]/");
        assert_blocked("http://[fe80::1]/");
    }

    #[test]
    fn rejects_ipv4_mapped_ipv6() {
        assert_blocked("http://[::ffff:127.0.0.1]/");
    }

    #[test]
    fn accepts_boundary_ips_one_octet_off() {
        assert_ok("http://128.0.0.0/");
        assert_ok("http://169.253.0.0/");
        assert_ok("http://169.255.0.0/");
        assert_ok("http://172.15.0.0/");
        assert_ok("http://172.32.0.0/");
    }

    #[test]
    fn accepts_ordinary_hosts() {
        assert_ok("https://api.example.com/health");
        assert_ok("http://example.com");
    }

    #[test]
    fn ssrf_reason_classification() {
        assert!(UrlValidation::is_ssrf_reason("hostname is a localhost/loopback alias: localhost"));
        assert!(UrlValidation::is_ssrf_reason("IPv4 address in the private range 10.0.0.0/8"));
        assert!(!UrlValidation::is_ssrf_reason("unsupported scheme: ftp"));
        assert!(!UrlValidation::is_ssrf_reason("could not parse URL"));
    }
}
