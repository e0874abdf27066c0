// crates/driftwatch-orchestrator/src/lib.rs
// ============================================================================
// Module: Workflow Orchestrator
// Description: Sequences probe -> probe -> diff -> history -> explanation ->
//              persist for one comparison, with per-step idempotency.
// Purpose: The single place that composes the Probe, Diff Engine, Pair Store,
//          and Explanation Client into the comparison pipeline.
// Dependencies: driftwatch-core, driftwatch-probe, driftwatch-store-sqlite,
//               driftwatch-explain, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`compare_environments`] runs the canonical sequence described in this
//! system's overview: `createComparison`, `probeLeft`/`probeRight`,
//! `saveLeftProbe`/`saveRightProbe`, `computeDiff`, `loadHistory`, the
//! explanation call, and `saveResult`. Every step writes through a
//! [`driftwatch_store_sqlite::PairStore`] keyed by `comparisonId`, so a
//! second at-least-once delivery of the same call re-issues the same writes
//! rather than duplicating state.
//!
//! Unlike a registry-style broker that wires a dynamic set of sources and
//! sinks behind trait objects, this orchestrator composes a small, fixed
//! pipeline of four concrete collaborators; the shared idiom is the closed
//! `#[from]`-wired error enum and "record failure, then propagate" behavior
//! on the uncaught-exception path.

#![deny(missing_docs)]

use std::thread;
use std::time::Duration;

use driftwatch_core::Comparison;
use driftwatch_core::ComparisonId;
use driftwatch_core::CompareErrorCode;
use driftwatch_core::EnvDiff;
use driftwatch_core::PairKey;
use driftwatch_core::Side;
use driftwatch_core::SignalEnvelope;
use driftwatch_core::StoredError;
use driftwatch_core::compute_diff;
use driftwatch_explain::ExplainClient;
use driftwatch_explain::ExplainError;
use driftwatch_explain::Explanation;
use driftwatch_probe::ProbeContext;
use driftwatch_store_sqlite::PairStore;
use driftwatch_store_sqlite::PairStoreError;
use thiserror::Error;

/// Maximum attempts for the explanation call, including the first try.
const LLM_MAX_ATTEMPTS: u32 = 3;
/// Backoff before the 2nd and 3rd attempts: 1s, then 2s. A would-be 4s
/// backoff before a 4th attempt is never used since `LLM_MAX_ATTEMPTS` caps
/// the loop at three.
const LLM_BACKOFF_MS: [u64; 2] = [1_000, 2_000];

/// History depth passed to the explanation prompt.
const HISTORY_LIMIT: u32 = 10;

/// Inputs for one comparison run.
#[derive(Debug, Clone)]
pub struct CompareInput {
    /// The comparison identifier, already derived by the Gateway.
    pub comparison_id: ComparisonId,
    /// Left (e.g. staging) URL.
    pub left_url: String,
    /// Right (e.g. production) URL.
    pub right_url: String,
    /// Optional display label for the left URL.
    pub left_label: Option<String>,
    /// Optional display label for the right URL.
    pub right_label: Option<String>,
}

/// The persisted result of a completed comparison, matching the
/// `CompareResult` shape of the external HTTP API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompareResult {
    /// The comparison identifier.
    pub comparison_id: ComparisonId,
    /// Left URL, as submitted.
    pub left_url: String,
    /// Right URL, as submitted.
    pub right_url: String,
    /// Optional display label for the left URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_label: Option<String>,
    /// Optional display label for the right URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_label: Option<String>,
    /// The left envelope, once captured.
    pub left: SignalEnvelope,
    /// The right envelope, once captured.
    pub right: SignalEnvelope,
    /// The computed structured diff.
    pub diff: EnvDiff,
    /// The validated explanation, when the explanation call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

/// Errors surfaced by [`compare_environments`]. Every variant maps to a
/// [`CompareErrorCode`] via [`OrchestratorError::error_code`] so the
/// Gateway can persist a closed-vocabulary [`StoredError`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The pair store reported a failure.
    #[error("pair store error: {0}")]
    Store(#[from] PairStoreError),
    /// The explanation call was exhausted after all retries.
    #[error("LLM service unavailable after {LLM_MAX_ATTEMPTS} attempts")]
    ExplainExhausted,
}

impl OrchestratorError {
    /// Maps this error to the closed [`CompareErrorCode`] vocabulary used in
    /// persisted failures and the HTTP API.
    #[must_use]
    pub const fn error_code(&self) -> CompareErrorCode {
        match self {
            Self::Store(_) => CompareErrorCode::InternalError,
            Self::ExplainExhausted => CompareErrorCode::InternalError,
        }
    }
}

/// Runs the full comparison pipeline for `input` against `store`, probing
/// both sides, computing the diff, requesting an explanation, and
/// persisting every step.
///
/// Every write is keyed by `input.comparison_id`, so re-running this
/// function for the same input (the at-least-once delivery the Orchestrator
/// is specified to tolerate) re-issues idempotent upserts rather than
/// duplicating state.
///
/// # Errors
/// Returns [`OrchestratorError`] when any step fails after the retries it
/// is specified to carry. On any such failure, a [`StoredError`] has
/// already been written to `store` under `input.comparison_id` before the
/// error is returned.
pub fn compare_environments(
    input: &CompareInput,
    store: &PairStore,
    explain: &ExplainClient,
) -> Result<CompareResult, OrchestratorError> {
    tracing::info!(comparison_id = %input.comparison_id, left = %input.left_url, right = %input.right_url, "starting comparison");
    match run(input, store, explain) {
        Ok(result) => {
            tracing::info!(comparison_id = %input.comparison_id, "comparison completed");
            Ok(result)
        }
        Err(err) => {
            let stored = StoredError { code: err.error_code(), message: err.to_string(), details: None };
            tracing::warn!(comparison_id = %input.comparison_id, error = %err, "comparison failed");
            // Best-effort: if the store itself is unreachable there is
            // nothing further this orchestrator can do for this attempt.
            let _ = store.fail_comparison(&input.comparison_id, &stored);
            Err(err)
        }
    }
}

fn run(
    input: &CompareInput,
    store: &PairStore,
    explain: &ExplainClient,
) -> Result<CompareResult, OrchestratorError> {
    store.create_comparison(&input.comparison_id, &input.left_url, &input.right_url)?;

    let left = probe_side(input, Side::Left, &input.left_url);
    store.save_probe(&input.comparison_id, Side::Left, &left)?;

    let right = probe_side(input, Side::Right, &input.right_url);
    store.save_probe(&input.comparison_id, Side::Right, &right)?;

    let diff = compute_diff(&left, &right);

    let history = load_history(input, store);

    let explanation = request_explanation(&diff, &history, explain)?;

    let result = CompareResult {
        comparison_id: input.comparison_id.clone(),
        left_url: input.left_url.clone(),
        right_url: input.right_url.clone(),
        left_label: input.left_label.clone(),
        right_label: input.right_label.clone(),
        left,
        right,
        diff,
        explanation: Some(explanation),
    };

    let result_json = serde_json::to_value(&result)
        .map_err(|err| OrchestratorError::Store(PairStoreError::Invalid(err.to_string())))?;
    store.save_result(&input.comparison_id, &result_json)?;
    Ok(result)
}

fn probe_side(input: &CompareInput, side: Side, url: &str) -> SignalEnvelope {
    let ctx = ProbeContext::new(input.comparison_id.clone(), side);
    driftwatch_probe::probe(url, &ctx)
}

/// Best-effort history lookup: any store failure here is swallowed into an
/// empty history rather than failing the whole comparison, per this
/// orchestrator's `loadHistory` contract.
fn load_history(input: &CompareInput, store: &PairStore) -> Vec<Comparison> {
    let _pair_key = PairKey::compute(&input.left_url, &input.right_url);
    store.get_comparisons_for_history(HISTORY_LIMIT).unwrap_or_default()
}

/// Requests an explanation, retrying transport failures up to
/// [`LLM_MAX_ATTEMPTS`] times with the fixed 1s/2s backoff schedule before
/// giving up.
fn request_explanation(
    diff: &EnvDiff,
    history: &[Comparison],
    explain: &ExplainClient,
) -> Result<Explanation, OrchestratorError> {
    let mut attempt = 0;
    loop {
        match explain.explain(diff, history) {
            Ok(explanation) => return Ok(explanation),
            Err(ExplainError::Transport(_)) if attempt < LLM_BACKOFF_MS.len() => {
                tracing::debug!(attempt, backoff_ms = LLM_BACKOFF_MS[attempt], "explanation call failed, retrying");
                thread::sleep(Duration::from_millis(LLM_BACKOFF_MS[attempt]));
                attempt += 1;
            }
            Err(_) => return Err(OrchestratorError::ExplainExhausted),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use driftwatch_core::PairKey;

    use super::*;

    fn new_input() -> CompareInput {
        let pair_key = PairKey::compute("https://staging.example.com", "https://example.com");
        CompareInput {
            comparison_id: ComparisonId::generate(&pair_key),
            left_url: "https://staging.example.com".to_string(),
            right_url: "https://example.com".to_string(),
            left_label: None,
            right_label: None,
        }
    }

    #[test]
    fn error_code_maps_to_internal_error() {
        let err = OrchestratorError::ExplainExhausted;
        assert_eq!(err.error_code(), CompareErrorCode::InternalError);
    }

    #[test]
    fn load_history_is_empty_for_a_fresh_store() {
        let store = PairStore::open_in_memory().unwrap();
        let input = new_input();
        let history = load_history(&input, &store);
        assert!(history.is_empty());
    }

    #[test]
    fn compare_input_carries_optional_labels() {
        let mut input = new_input();
        input.left_label = Some("staging".to_string());
        assert_eq!(input.left_label.as_deref(), Some("staging"));
        assert!(input.right_label.is_none());
    }
}
