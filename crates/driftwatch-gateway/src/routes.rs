// crates/driftwatch-gateway/src/routes.rs
// ============================================================================
// Module: REST Gateway
// Description: POST/GET HTTP surface over the Orchestrator and Pair Store.
// Purpose: Parse and validate requests, route polls to the correct per-pair
//          store, and map every failure to the closed CompareErrorCode
//          vocabulary.
// Dependencies: axum, driftwatch-core, driftwatch-orchestrator,
//               driftwatch-store-sqlite, driftwatch-explain, serde_json,
//               tokio, tower-http
// ============================================================================

//! ## Overview
//! One [`AppState`] serves every pair this process has seen: it lazily opens
//! (and caches) one [`PairStore`] per pair-key prefix, matching §4.6's
//! routing rule of extracting the first 40 hex characters of a
//! `comparisonId` to find the right store instance.
//!
//! Following the teacher's HTTP transport (`decision-gate-mcp`'s
//! `serve_http`), handlers are thin: build a [`Router`], extract typed
//! state, and return `(StatusCode, Json<_>)`. Unlike the teacher, which
//! dispatches JSON-RPC over a single `/rpc` route, this Gateway exposes the
//! plain REST surface in §6.1 directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use axum::Json;
use axum::Router;
use axum::extract::Path as AxumPath;
use axum::extract::Request;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::ACCESS_CONTROL_ALLOW_HEADERS;
use axum::http::header::ACCESS_CONTROL_ALLOW_METHODS;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::middleware::Next;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use driftwatch_core::CompareErrorCode;
use driftwatch_core::ComparisonId;
use driftwatch_core::ComparisonStatus;
use driftwatch_core::PairKey;
use driftwatch_core::StoredError;
use driftwatch_core::UrlValidation;
use driftwatch_core::UrlValidationOutcome;
use driftwatch_core::validate_url;
use driftwatch_explain::ExplainClient;
use driftwatch_explain::ExplainConfig as ExplainClientConfig;
use driftwatch_orchestrator::CompareInput;
use driftwatch_orchestrator::compare_environments;
use driftwatch_store_sqlite::PairStore;
use driftwatch_store_sqlite::PairStoreError;
use serde::Deserialize;
use serde::Serialize;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;

use crate::config::GatewayConfig;

/// Shared state for every Gateway route.
pub struct AppState {
    store_dir: PathBuf,
    stores: Mutex<HashMap<String, Arc<PairStore>>>,
    explain: Arc<ExplainClient>,
}

/// Errors constructing [`AppState`] or an on-demand [`PairStore`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The explanation client could not be constructed.
    #[error("failed to build explanation client: {0}")]
    Explain(#[from] driftwatch_explain::ExplainError),
    /// A per-pair store could not be opened.
    #[error("failed to open pair store: {0}")]
    Store(#[from] PairStoreError),
}

impl AppState {
    /// Builds Gateway state from a loaded [`GatewayConfig`].
    ///
    /// # Errors
    /// Returns [`GatewayError`] when the explanation client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let explain = ExplainClient::new(ExplainClientConfig {
            endpoint: config.explain.endpoint.clone(),
            api_key: config.explain.resolve_api_key(),
            model: config.explain.model.clone(),
            timeout_ms: config.explain.timeout_ms,
        })?;
        Ok(Self {
            store_dir: config.store.dir.clone(),
            stores: Mutex::new(HashMap::new()),
            explain: Arc::new(explain),
        })
    }

    /// Returns the cached store for `prefix`, opening and caching one at
    /// `{store_dir}/{prefix}.sqlite3` if this is the first request for it.
    fn store_for(&self, prefix: &str) -> Result<Arc<PairStore>, GatewayError> {
        let mut stores = self.stores.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(store) = stores.get(prefix) {
            return Ok(Arc::clone(store));
        }
        let path = self.store_dir.join(format!("{prefix}.sqlite3"));
        let store = Arc::new(PairStore::open(&path)?);
        stores.insert(prefix.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Checks that every pair store opened so far is still alive.
    ///
    /// A process that has not yet served a single comparison has no store
    /// to check and is reported ready; once a store exists, its SQLite
    /// connection must answer a liveness probe.
    fn check_readiness(&self) -> bool {
        let stores = self.stores.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stores.values().all(|store| store.readiness().is_ok())
    }
}

/// Builds the Gateway's router over `state`.
#[must_use]
pub fn router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let mut app = Router::new()
        .route("/api/compare", post(start_compare))
        .route("/api/compare/:comparison_id", get(poll_compare))
        .route("/api/health", get(health))
        .with_state(state);
    if cors_permissive {
        app = app
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(from_fn(cors_preflight));
    }
    app
}

/// Answers any `OPTIONS` request with `204 No Content` and permissive CORS
/// headers, per §6.1's `OPTIONS *` contract. Layered outside [`CorsLayer`]
/// so it intercepts preflight before routing, rather than relying on
/// whatever status code `CorsLayer`'s own preflight short-circuit happens
/// to pick.
async fn cors_preflight(request: Request, next: Next) -> axum::response::Response {
    if request.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
                (ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            ],
        )
            .into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    #[serde(rename = "leftUrl")]
    left_url: Option<String>,
    #[serde(rename = "rightUrl")]
    right_url: Option<String>,
    #[serde(rename = "leftLabel")]
    left_label: Option<String>,
    #[serde(rename = "rightLabel")]
    right_label: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompareAccepted {
    #[serde(rename = "comparisonId")]
    comparison_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: StoredError,
}

fn error_response(status: StatusCode, code: CompareErrorCode, message: impl Into<String>) -> impl IntoResponse {
    let body = ErrorBody { error: StoredError { code, message: message.into(), details: None } };
    (status, Json(body))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ok = state.check_readiness();
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({"ok": ok})))
}

async fn start_compare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> axum::response::Response {
    let (Some(left_url), Some(right_url)) = (request.left_url, request.right_url) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            CompareErrorCode::InvalidRequest,
            "leftUrl and rightUrl are required",
        )
        .into_response();
    };

    if let Some(response) = reject_invalid_url(&left_url).or_else(|| reject_invalid_url(&right_url)) {
        return response;
    }

    let pair_key = PairKey::compute(&left_url, &right_url);
    let comparison_id = ComparisonId::generate(&pair_key);
    tracing::info!(comparison_id = %comparison_id, left = %left_url, right = %right_url, "accepted compare request");

    let store = match state.store_for(pair_key.prefix40()) {
        Ok(store) => store,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, CompareErrorCode::InternalError, err.to_string())
                .into_response();
        }
    };
    let explain = Arc::clone(&state.explain);

    let input = CompareInput {
        comparison_id: comparison_id.clone(),
        left_url,
        right_url,
        left_label: request.left_label,
        right_label: request.right_label,
    };

    // The handler returns as soon as the comparison has been enqueued; the
    // orchestrator drives the rest of the pipeline on a blocking thread.
    tokio::task::spawn_blocking(move || {
        let _ = compare_environments(&input, &store, &explain);
    });

    (StatusCode::ACCEPTED, Json(CompareAccepted { comparison_id: comparison_id.as_str().to_string() }))
        .into_response()
}

fn reject_invalid_url(url: &str) -> Option<axum::response::Response> {
    let validation = validate_url(url);
    if validation.is_ok() {
        return None;
    }
    let UrlValidationOutcome::Rejected { reason } = validation.outcome else {
        return None;
    };
    let code =
        if UrlValidation::is_ssrf_reason(&reason) { CompareErrorCode::SsrfBlocked } else { CompareErrorCode::InvalidUrl };
    Some(error_response(StatusCode::BAD_REQUEST, code, reason).into_response())
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum CompareStatusResponse {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed {
        result: serde_json::Value,
    },
    #[serde(rename = "failed")]
    Failed {
        error: StoredError,
    },
}

async fn poll_compare(
    State(state): State<Arc<AppState>>,
    AxumPath(comparison_id): AxumPath<String>,
) -> axum::response::Response {
    let comparison_id = ComparisonId::from_raw(comparison_id);
    let store = match state.store_for(comparison_id.pair_key_prefix()) {
        Ok(store) => store,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, CompareErrorCode::InternalError, err.to_string())
                .into_response();
        }
    };

    let comparison = match store.get_comparison(&comparison_id) {
        Ok(comparison) => comparison,
        Err(err) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, CompareErrorCode::InternalError, err.to_string())
                .into_response();
        }
    };

    let Some(comparison) = comparison else {
        return error_response(StatusCode::NOT_FOUND, CompareErrorCode::InvalidRequest, "Comparison not found")
            .into_response();
    };

    let body = match comparison.status {
        ComparisonStatus::Running => CompareStatusResponse::Running,
        ComparisonStatus::Completed => {
            CompareStatusResponse::Completed { result: comparison.result.unwrap_or(serde_json::Value::Null) }
        }
        ComparisonStatus::Failed => CompareStatusResponse::Failed {
            error: comparison.error.unwrap_or(StoredError {
                code: CompareErrorCode::InternalError,
                message: "comparison failed with no recorded error".to_string(),
                details: None,
            }),
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use tower::ServiceExt;

    use super::*;

    fn test_config(dir: &std::path::Path) -> GatewayConfig {
        GatewayConfig {
            server: crate::config::ServerConfig { bind: "127.0.0.1:0".to_string(), cors_permissive: true },
            store: crate::config::StoreConfig { dir: dir.to_path_buf() },
            explain: crate::config::ExplainConfig {
                endpoint: "https://example.invalid/v1/chat/completions".to_string(),
                api_key_env: None,
                model: "test-model".to_string(),
                timeout_ms: 5_000,
            },
        }
    }

    #[tokio::test]
    async fn health_returns_ok_true() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/api/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_preflight_on_compare_gets_permissive_headers() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("OPTIONS")
                    .uri("/api/compare")
                    .header("origin", "https://example.com")
                    .header("access-control-request-method", "POST")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn cors_preflight_on_an_arbitrary_unregistered_path_still_gets_204() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("OPTIONS")
                    .uri("/anything/not/a/real/route")
                    .header("origin", "https://example.com")
                    .header("access-control-request-method", "GET")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn health_stays_ok_once_a_pair_store_has_been_opened() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        state.store_for("deadbeef").unwrap();
        let app = router(state, true);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/api/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn poll_unknown_comparison_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let pair_key = PairKey::compute("https://a.example.com", "https://b.example.com");
        let comparison_id = ComparisonId::generate(&pair_key);
        let uri = format!("/api/compare/{comparison_id}");
        let response = app
            .oneshot(axum::http::Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_compare_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/compare")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_compare_rejects_ssrf_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(&test_config(dir.path())).unwrap());
        let app = router(state, true);
        let body = serde_json::json!({
            "leftUrl": "http://localhost/",
            "rightUrl": "https://example.com/",
        });
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/compare")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
