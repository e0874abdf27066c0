// crates/driftwatch-probe/src/redirect.rs
// ============================================================================
// Module: Redirect Walker
// Description: Manually walks a 3xx chain, hop by hop, instead of delegating
//              to the HTTP client's automatic redirect following.
// Purpose: Preserve the redirect chain (from/to/status per hop) that the
//          Diff Engine needs to compare between sides.
// Dependencies: reqwest (blocking), url
// ============================================================================

//! ## Overview
//! A redirect is only followed when its status is one of the five HTTP
//! redirect codes that carry a `Location`; any other 3xx is treated as a
//! terminal response, matching how most clients — and this system's own
//! Diff Engine — reason about "did this redirect."

use std::collections::HashSet;

use driftwatch_core::RedirectHop;

use crate::ProbeErrorCode;
use crate::ProbeFailure;

/// Maximum redirect hops walked before giving up.
pub(crate) const MAX_HOPS: u32 = 10;

const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// The outcome of processing one response during the walk.
pub(crate) enum RedirectOutcome {
    /// The response was a redirect; the walker advanced to the next hop.
    Redirected,
    /// The response is the terminal (non-redirect) response.
    Terminal { response: reqwest::blocking::Response, status: u16 },
}

/// Tracks the current URL, visited set (for loop detection), and the
/// recorded hop sequence across one probe's redirect walk.
pub(crate) struct RedirectWalker {
    current_url: String,
    visited: HashSet<String>,
    hops: Vec<RedirectHop>,
}

impl RedirectWalker {
    pub(crate) fn new(start_url: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start_url.to_string());
        Self { current_url: start_url.to_string(), visited, hops: Vec::new() }
    }

    pub(crate) fn current_url(&self) -> &str {
        &self.current_url
    }

    pub(crate) fn hop_count(&self) -> u32 {
        u32::try_from(self.hops.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn into_hops(self) -> Vec<RedirectHop> {
        self.hops
    }

    /// Processes one response: either records a hop and advances, or
    /// signals that this response is the terminal one.
    pub(crate) fn advance(
        &mut self,
        requested: &str,
        response: reqwest::blocking::Response,
    ) -> Result<RedirectOutcome, ProbeFailure> {
        let status = response.status().as_u16();
        if !(300..400).contains(&status) || !REDIRECT_STATUSES.contains(&status) {
            return Ok(RedirectOutcome::Terminal { response, status });
        }

        let Some(location) = response.headers().get(reqwest::header::LOCATION) else {
            return Err(ProbeFailure::new(
                ProbeErrorCode::FetchError,
                format!("redirect response {status} is missing a Location header"),
            ));
        };
        let Ok(location) = location.to_str() else {
            return Err(ProbeFailure::new(
                ProbeErrorCode::FetchError,
                "redirect Location header is not valid UTF-8",
            ));
        };

        let resolved = resolve_location(requested, location)?;
        if self.visited.contains(&resolved) {
            return Err(ProbeFailure::new(
                ProbeErrorCode::FetchError,
                "redirect loop detected",
            ));
        }
        if self.hops.len() as u32 >= MAX_HOPS {
            return Err(ProbeFailure::new(ProbeErrorCode::FetchError, "too many redirect hops"));
        }

        self.hops.push(RedirectHop {
            from_url: requested.to_string(),
            to_url: resolved.clone(),
            status,
        });
        self.visited.insert(resolved.clone());
        self.current_url = resolved;
        Ok(RedirectOutcome::Redirected)
    }
}

fn resolve_location(current: &str, location: &str) -> Result<String, ProbeFailure> {
    let base = url::Url::parse(current)
        .map_err(|_| ProbeFailure::new(ProbeErrorCode::FetchError, "current URL failed to parse"))?;
    let resolved = base
        .join(location)
        .map_err(|_| ProbeFailure::new(ProbeErrorCode::FetchError, "redirect Location is not a valid URL"))?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walker_starts_with_visited_seed() {
        let walker = RedirectWalker::new("https://example.com/");
        assert_eq!(walker.current_url(), "https://example.com/");
        assert_eq!(walker.hop_count(), 0);
    }

    #[test]
    fn resolve_location_handles_relative_paths() {
        let resolved = resolve_location("https://example.com/a/b", "/c").unwrap();
        assert_eq!(resolved, "https://example.com/c");
    }
}
