// crates/driftwatch-explain/src/lib.rs
// ============================================================================
// Module: Explanation Client
// Description: Bounded external call that turns an EnvDiff and a short
//              history into a validated, grounded natural-language
//              explanation.
// Purpose: Isolate the only non-deterministic, externally-hosted collaborator
//          in the comparison pipeline behind a narrow, validated contract.
// Dependencies: driftwatch-core, reqwest (blocking, json), serde, serde_json,
//               thiserror
// ============================================================================

//! ## Overview
//! The core's only contract with the explanation model: given an [`EnvDiff`]
//! and a short history, produce and validate a JSON object of the shape
//! `{summary, ranked_causes, actions, notes?}`. This crate owns prompt
//! construction, response extraction (markdown fences stripped, first
//! balanced-brace JSON object extracted), and output validation; the exact
//! prompt text is intentionally not part of the public surface.
//!
//! Unlike the teacher's evidence providers, which fetch bytes and hash them,
//! this client's bounded-call idiom (timeout, closed error taxonomy, no
//! panics) is the same shape applied to a JSON chat-completion endpoint
//! instead of a raw HTTP GET.

#![deny(missing_docs)]

use driftwatch_core::Comparison;
use driftwatch_core::ComparisonStatus;
use driftwatch_core::EnvDiff;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

const FINDINGS_CHAR_BUDGET: usize = 1_500;
const HISTORY_CHAR_BUDGET: usize = 800;
const SYSTEM_PROMPT: &str = "You are an SRE assistant explaining HTTP endpoint drift. \
Respond with a single JSON object only, no markdown, no commentary.";

/// Configuration for the [`ExplainClient`].
#[derive(Debug, Clone)]
pub struct ExplainConfig {
    /// Chat-completion-style endpoint URL.
    pub endpoint: String,
    /// Bearer token sent as `Authorization`, when set.
    pub api_key: Option<String>,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Request timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// A single ranked cause in an [`Explanation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCause {
    /// Short description of the candidate cause.
    pub cause: String,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Supporting evidence strings, e.g. finding codes or header names.
    pub evidence: Vec<String>,
}

/// A single recommended action in an [`Explanation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAction {
    /// The recommended action, in imperative form.
    pub action: String,
    /// Why this action addresses the drift.
    pub why: String,
}

/// A validated explanation of one comparison's drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// A short, human-readable summary of the drift.
    pub summary: String,
    /// Candidate causes, most likely first.
    pub ranked_causes: Vec<RankedCause>,
    /// Recommended follow-up actions.
    pub actions: Vec<RecommendedAction>,
    /// Optional free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

/// Errors surfaced by the Explanation Client.
#[derive(Debug, Error)]
pub enum ExplainError {
    /// The HTTP call itself failed (network, TLS, non-2xx status).
    #[error("explanation service transport error: {0}")]
    Transport(String),
    /// The model's response did not contain an extractable JSON object.
    #[error("explanation service returned no extractable JSON object")]
    NoJsonObject,
    /// The extracted JSON object did not match the expected shape.
    #[error("explanation service returned malformed output: {0}")]
    Malformed(String),
    /// The extracted object was well-formed JSON but failed validation.
    #[error("explanation service output rejected: {0}")]
    Rejected(String),
}

/// A bounded client for the external explanation model.
pub struct ExplainClient {
    http: reqwest::blocking::Client,
    config: ExplainConfig,
}

impl ExplainClient {
    /// Builds a client for the given configuration.
    ///
    /// # Errors
    /// Returns [`ExplainError::Transport`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: ExplainConfig) -> Result<Self, ExplainError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ExplainError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    /// Requests and validates an explanation for `diff`, grounded by a short
    /// `history` of prior comparisons for the same pair.
    ///
    /// # Errors
    /// Returns [`ExplainError`] if the call fails, the response contains no
    /// extractable JSON object, or the object fails shape/range validation.
    pub fn explain(&self, diff: &EnvDiff, history: &[Comparison]) -> Result<Explanation, ExplainError> {
        let prompt = build_prompt(diff, history);
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let mut request = self.http.post(&self.config.endpoint).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().map_err(|err| ExplainError::Transport(err.to_string()))?;
        let response =
            response.error_for_status().map_err(|err| ExplainError::Transport(err.to_string()))?;
        let body: serde_json::Value =
            response.json().map_err(|err| ExplainError::Transport(err.to_string()))?;

        let text = extract_message_text(&body)?;
        let json_text = extract_json_object(strip_markdown_fences(text)).ok_or(ExplainError::NoJsonObject)?;
        let explanation: Explanation =
            serde_json::from_str(&json_text).map_err(|err| ExplainError::Malformed(err.to_string()))?;
        validate_explanation(&explanation)?;
        Ok(explanation)
    }
}

fn build_prompt(diff: &EnvDiff, history: &[Comparison]) -> String {
    let findings_json = serde_json::to_string(&diff.findings).unwrap_or_default();
    let findings = truncate_chars(&findings_json, FINDINGS_CHAR_BUDGET);
    let history_summary = summarize_history(history);
    let history_summary = truncate_chars(&history_summary, HISTORY_CHAR_BUDGET);
    format!(
        "Findings (JSON, possibly truncated):\n{findings}\n\n\
         Recent history (possibly truncated):\n{history_summary}\n\n\
         Respond with JSON: {{\"summary\": string, \
         \"ranked_causes\": [{{\"cause\": string, \"confidence\": number, \"evidence\": [string]}}], \
         \"actions\": [{{\"action\": string, \"why\": string}}], \"notes\"?: [string]}}."
    )
}

fn summarize_history(history: &[Comparison]) -> String {
    history
        .iter()
        .filter(|comparison| comparison.status == ComparisonStatus::Completed)
        .map(|comparison| format!("{} vs {}", comparison.left_url, comparison.right_url))
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate_chars(value: &str, budget: usize) -> String {
    if value.chars().count() <= budget {
        return value.to_string();
    }
    value.chars().take(budget).collect()
}

fn strip_markdown_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_message_text(body: &serde_json::Value) -> Result<&str, ExplainError> {
    body.pointer("/choices/0/message/content")
        .and_then(serde_json::Value::as_str)
        .ok_or(ExplainError::NoJsonObject)
}

/// Extracts the first complete top-level JSON object from `text`, tracking
/// string literals and escape sequences so braces inside strings are
/// ignored.
fn extract_json_object(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start ..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(text[start .. end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_explanation(explanation: &Explanation) -> Result<(), ExplainError> {
    if explanation.summary.trim().is_empty() {
        return Err(ExplainError::Rejected("summary is empty".to_string()));
    }
    for cause in &explanation.ranked_causes {
        if !(0.0 ..= 1.0).contains(&cause.confidence) {
            return Err(ExplainError::Rejected(format!(
                "confidence {} out of range [0, 1]",
                cause.confidence
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_ignores_braces_in_strings() {
        let text = r#"noise {"a": "a { weird } value", "b": 1} trailing"#;
        let extracted = extract_json_object(text).unwrap();
        assert_eq!(extracted, r#"{"a": "a { weird } value", "b": 1}"#);
    }

    #[test]
    fn extract_json_object_handles_escaped_quotes() {
        let text = r#"{"a": "she said \"hi\""}"#;
        assert_eq!(extract_json_object(text).unwrap(), text);
    }

    #[test]
    fn extract_json_object_none_when_unbalanced() {
        assert!(extract_json_object("{\"a\": 1").is_none());
    }

    #[test]
    fn strip_markdown_fences_removes_json_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(text), "{\"a\": 1}");
    }

    #[test]
    fn validate_explanation_rejects_empty_summary() {
        let explanation =
            Explanation { summary: String::new(), ranked_causes: vec![], actions: vec![], notes: None };
        assert!(validate_explanation(&explanation).is_err());
    }

    #[test]
    fn validate_explanation_rejects_out_of_range_confidence() {
        let explanation = Explanation {
            summary: "drift detected".to_string(),
            ranked_causes: vec![RankedCause {
                cause: "cache policy changed".to_string(),
                confidence: 1.5,
                evidence: vec!["CACHE_HEADER_DRIFT".to_string()],
            }],
            actions: vec![],
            notes: None,
        };
        assert!(validate_explanation(&explanation).is_err());
    }

    #[test]
    fn validate_explanation_accepts_well_formed_output() {
        let explanation = Explanation {
            summary: "drift detected".to_string(),
            ranked_causes: vec![RankedCause {
                cause: "cache policy changed".to_string(),
                confidence: 0.8,
                evidence: vec!["CACHE_HEADER_DRIFT".to_string()],
            }],
            actions: vec![RecommendedAction {
                action: "confirm intended cache policy change".to_string(),
                why: "right disabled caching entirely".to_string(),
            }],
            notes: None,
        };
        assert!(validate_explanation(&explanation).is_ok());
    }

    #[test]
    fn truncate_chars_respects_budget() {
        let value = "a".repeat(10);
        assert_eq!(truncate_chars(&value, 3).chars().count(), 3);
        assert_eq!(truncate_chars(&value, 100), value);
    }
}
