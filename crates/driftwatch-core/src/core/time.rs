// crates/driftwatch-core/src/core/time.rs
// ============================================================================
// Module: Timestamps
// Description: ISO-8601 capture instants and millisecond-epoch timestamps.
// Purpose: Centralize the two timestamp representations this system uses —
//          capture instants on envelopes, epoch milliseconds in storage.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Unlike the teacher's core, which never reads the wall clock directly and
//! relies entirely on host-supplied timestamps, this system's Probe and
//! Pair Store generate real timestamps themselves — the spec requires
//! `capturedAt` (ISO-8601) on every envelope and `createdAt` (epoch
//! milliseconds) on every stored record. This module is the single place
//! that formatting happens, so the two representations stay consistent.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Formats the given instant as an ISO-8601 / RFC 3339 string, the format
/// used for `SignalEnvelope.capturedAt`.
///
/// # Panics
/// Never: [`OffsetDateTime`] always formats successfully under RFC 3339.
#[must_use]
pub fn capture_instant(now: OffsetDateTime) -> String {
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Returns the current instant, for callers that need to both format it and
/// derive an epoch-millisecond timestamp from the same sample.
#[must_use]
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Converts an instant to milliseconds since the Unix epoch, the format
/// used for `Comparison.createdAt` / `Probe.createdAt`.
#[must_use]
pub fn epoch_millis(instant: OffsetDateTime) -> i64 {
    let millis = instant.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_instant_is_rfc3339() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp");
        let formatted = capture_instant(t);
        assert!(formatted.contains('T'));
        assert!(formatted.ends_with('Z') || formatted.contains('+'));
    }

    #[test]
    fn epoch_millis_roundtrip() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp");
        assert_eq!(epoch_millis(t), 1_700_000_000_000);
    }
}
