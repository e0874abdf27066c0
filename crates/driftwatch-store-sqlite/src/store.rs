// crates/driftwatch-store-sqlite/src/store.rs
// ============================================================================
// Module: Pair Store
// Description: SQLite-backed persistence for one pair's comparisons/probes.
// Purpose: Idempotent upserts, ring-buffer retention, and stale-comparison
//          detection for a single pair fingerprint's storage instance.
// Dependencies: driftwatch-core, rusqlite, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Unlike the teacher's `SqliteRunStateStore`, this store has no writer
//! queue, no perf histograms, and no schema registry — one pair's traffic
//! is low enough that a single mutex-guarded connection is sufficient. The
//! schema, pragma setup, and error taxonomy follow the teacher's pattern.

use std::path::Path;
use std::sync::Mutex;

use driftwatch_core::ComparisonId;
use driftwatch_core::ComparisonStatus;
use driftwatch_core::Comparison;
use driftwatch_core::CompareErrorCode;
use driftwatch_core::ProbeId;
use driftwatch_core::ProbeRecord;
use driftwatch_core::Side;
use driftwatch_core::SignalEnvelope;
use driftwatch_core::StoredError;
use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Number of newest comparisons retained per pair; older rows are evicted.
const RETENTION_LIMIT: i64 = 50;
/// A `running` comparison older than this is considered abandoned.
const STALE_THRESHOLD_MS: i64 = 5 * 60 * 1_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors surfaced by the Pair Store. The store itself retries nothing;
/// every error here propagates to the Orchestrator as-is.
#[derive(Debug, Error, Clone)]
pub enum PairStoreError {
    /// The database file or its parent directory could not be accessed.
    #[error("pair store io error: {0}")]
    Io(String),
    /// The underlying `SQLite` engine returned an error.
    #[error("pair store db error: {0}")]
    Db(String),
    /// Stored data failed to deserialize or violated an invariant.
    #[error("pair store invalid data: {0}")]
    Invalid(String),
}

/// Lightweight in-memory operation counters for one [`PairStore`], scaled
/// down from the teacher's `SqliteStoreOpCounts`: no latency histograms,
/// since one pair's write volume never warrants them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PairStoreOpCounts {
    /// Every call into a store operation, regardless of outcome.
    pub attempted: u64,
    /// Calls that returned `Ok`.
    pub succeeded: u64,
    /// Ring-buffer evictions performed by `create_comparison`.
    pub evictions: u64,
}

/// One pair's isolated `SQLite`-backed comparison/probe store.
pub struct PairStore {
    connection: Mutex<Connection>,
    op_counts: Mutex<PairStoreOpCounts>,
}

impl PairStore {
    /// Opens (creating if needed) the `SQLite` database at `path` and lazily
    /// initializes its schema.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] if the parent directory cannot be created
    /// or the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, PairStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| PairStoreError::Io(err.to_string()))?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection =
            Connection::open_with_flags(path, flags).map_err(|err| PairStoreError::Db(err.to_string()))?;
        apply_pragmas(&connection)?;
        initialize_schema(&connection)?;
        tracing::debug!(path = %path.display(), "opened pair store");
        Ok(Self { connection: Mutex::new(connection), op_counts: Mutex::new(PairStoreOpCounts::default()) })
    }

    /// Opens an in-memory store, used by tests.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] if schema initialization fails.
    pub fn open_in_memory() -> Result<Self, PairStoreError> {
        let connection =
            Connection::open_in_memory().map_err(|err| PairStoreError::Db(err.to_string()))?;
        apply_pragmas(&connection)?;
        initialize_schema(&connection)?;
        Ok(Self { connection: Mutex::new(connection), op_counts: Mutex::new(PairStoreOpCounts::default()) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PairStoreError> {
        self.connection.lock().map_err(|_| PairStoreError::Io("store mutex poisoned".to_string()))
    }

    /// Runs a lightweight liveness probe against the underlying connection.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] if the connection is poisoned or the
    /// probe query fails.
    pub fn readiness(&self) -> Result<(), PairStoreError> {
        let guard = self.lock()?;
        guard.execute("SELECT 1", []).map_err(|err| PairStoreError::Db(err.to_string()))?;
        Ok(())
    }

    /// Returns a snapshot of this store's operation counters.
    #[must_use]
    pub fn op_counts(&self) -> PairStoreOpCounts {
        *self.op_counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records the outcome of one store operation.
    fn record_op<T, E>(&self, result: Result<T, E>) -> Result<T, E> {
        let mut counts = self.op_counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        counts.attempted += 1;
        if result.is_ok() {
            counts.succeeded += 1;
        }
        drop(counts);
        result
    }

    /// Records one ring-buffer eviction pass.
    fn record_eviction(&self) {
        let mut counts = self.op_counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        counts.evictions += 1;
        tracing::debug!(retention_limit = RETENTION_LIMIT, "ring buffer eviction");
    }

    /// Creates a new `running` comparison and, in the same transaction,
    /// enforces the 50-comparison ring-buffer retention for this pair.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on any underlying `SQLite` failure.
    pub fn create_comparison(
        &self,
        id: &ComparisonId,
        left_url: &str,
        right_url: &str,
    ) -> Result<(), PairStoreError> {
        let result = (|| {
            let mut guard = self.lock()?;
            let tx = guard.transaction().map_err(|err| PairStoreError::Db(err.to_string()))?;
            let ts = now_millis();
            tx.execute(
                "INSERT OR REPLACE INTO comparisons \
                 (id, ts, left_url, right_url, status, result_json, error_json) \
                 VALUES (?1, ?2, ?3, ?4, 'running', NULL, NULL)",
                params![id.as_str(), ts, left_url, right_url],
            )
            .map_err(|err| PairStoreError::Db(err.to_string()))?;

            // `ts` alone is not a safe ordering key: two comparisons created in the
            // same millisecond tie, and SQLite does not define an order among tied
            // rows. `rowid` (implicit on this table, since `id` is a TEXT primary
            // key rather than an INTEGER one) is strictly monotonic per insert and
            // breaks the tie, so eviction orders and deletes by the `(ts, rowid)`
            // pair rather than `ts` alone.
            let threshold: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT ts, rowid FROM comparisons ORDER BY ts DESC, rowid DESC LIMIT 1 OFFSET ?1",
                    params![RETENTION_LIMIT - 1],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            if let Some((threshold_ts, threshold_rowid)) = threshold {
                tx.execute(
                    "DELETE FROM probes WHERE comparison_id IN \
                     (SELECT id FROM comparisons WHERE (ts, rowid) < (?1, ?2))",
                    params![threshold_ts, threshold_rowid],
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
                tx.execute(
                    "DELETE FROM comparisons WHERE (ts, rowid) < (?1, ?2)",
                    params![threshold_ts, threshold_rowid],
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
                self.record_eviction();
            }

            tx.commit().map_err(|err| PairStoreError::Db(err.to_string()))
        })();
        self.record_op(result)
    }

    /// Upserts the envelope captured for one side of a comparison.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on serialization failure or any underlying
    /// `SQLite` failure.
    pub fn save_probe(
        &self,
        comparison_id: &ComparisonId,
        side: Side,
        envelope: &SignalEnvelope,
    ) -> Result<(), PairStoreError> {
        let result = (|| {
            let probe_id = ProbeId::derive(comparison_id, side);
            let url = envelope
                .result
                .response()
                .map_or_else(|| envelope.requested_url.clone(), |response| response.final_url.clone());
            let envelope_json = serde_json::to_string(envelope)
                .map_err(|err| PairStoreError::Invalid(err.to_string()))?;
            let guard = self.lock()?;
            guard
                .execute(
                    "INSERT OR REPLACE INTO probes \
                     (id, comparison_id, ts, side, url, envelope_json) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        probe_id.as_str(),
                        comparison_id.as_str(),
                        now_millis(),
                        side.as_str(),
                        url,
                        envelope_json,
                    ],
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            Ok(())
        })();
        self.record_op(result)
    }

    /// Marks a comparison `completed` with the given serialized result.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on any underlying `SQLite` failure.
    pub fn save_result(
        &self,
        comparison_id: &ComparisonId,
        result: &serde_json::Value,
    ) -> Result<(), PairStoreError> {
        let outcome = (|| {
            let guard = self.lock()?;
            guard
                .execute(
                    "UPDATE comparisons SET status = 'completed', result_json = ?1, error_json = NULL \
                     WHERE id = ?2",
                    params![result.to_string(), comparison_id.as_str()],
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            Ok(())
        })();
        self.record_op(outcome)
    }

    /// Marks a comparison `failed` with the given error, clearing any result.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on serialization failure or any underlying
    /// `SQLite` failure.
    pub fn fail_comparison(
        &self,
        comparison_id: &ComparisonId,
        error: &StoredError,
    ) -> Result<(), PairStoreError> {
        let result = (|| {
            let error_json = serde_json::to_string(error)
                .map_err(|err| PairStoreError::Invalid(err.to_string()))?;
            let guard = self.lock()?;
            guard
                .execute(
                    "UPDATE comparisons SET status = 'failed', error_json = ?1, result_json = NULL \
                     WHERE id = ?2",
                    params![error_json, comparison_id.as_str()],
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            Ok(())
        })();
        self.record_op(result)
    }

    /// Loads a comparison by id. A `running` comparison older than 5 minutes
    /// is lazily rewritten to `failed` (stale) and the rewritten state is
    /// returned.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on malformed stored data or any underlying
    /// `SQLite` failure.
    pub fn get_comparison(
        &self,
        comparison_id: &ComparisonId,
    ) -> Result<Option<Comparison>, PairStoreError> {
        let result = (|| {
            let guard = self.lock()?;
            let row = query_comparison_row(&guard, comparison_id)?;
            let Some(comparison) = row else {
                return Ok(None);
            };
            if comparison.status == ComparisonStatus::Running
                && now_millis().saturating_sub(comparison.created_at) > STALE_THRESHOLD_MS
            {
                tracing::warn!(comparison_id = %comparison_id, "rewriting stale running comparison to failed");
                let error = StoredError {
                    code: CompareErrorCode::Timeout,
                    message: "Stale comparison (workflow terminated or lost)".to_string(),
                    details: None,
                };
                let error_json = serde_json::to_string(&error)
                    .map_err(|err| PairStoreError::Invalid(err.to_string()))?;
                guard
                    .execute(
                        "UPDATE comparisons SET status = 'failed', error_json = ?1, result_json = NULL \
                         WHERE id = ?2",
                        params![error_json, comparison_id.as_str()],
                    )
                    .map_err(|err| PairStoreError::Db(err.to_string()))?;
                return Ok(Some(Comparison {
                    status: ComparisonStatus::Failed,
                    result: None,
                    error: Some(error),
                    ..comparison
                }));
            }
            Ok(Some(comparison))
        })();
        self.record_op(result)
    }

    /// Returns up to `limit` most recent `completed` comparisons, newest
    /// first.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on malformed stored data or any underlying
    /// `SQLite` failure.
    pub fn get_comparisons_for_history(
        &self,
        limit: u32,
    ) -> Result<Vec<Comparison>, PairStoreError> {
        let result = (|| {
            let guard = self.lock()?;
            let mut stmt = guard
                .prepare(
                    "SELECT id, ts, left_url, right_url, status, result_json, error_json \
                     FROM comparisons WHERE status = 'completed' ORDER BY ts DESC LIMIT ?1",
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            let rows = stmt
                .query_map(params![i64::from(limit)], |row| row_to_raw_comparison(row))
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let raw = row.map_err(|err| PairStoreError::Db(err.to_string()))?;
                out.push(raw.into_comparison()?);
            }
            Ok(out)
        })();
        self.record_op(result)
    }

    /// Loads both probe records for a comparison, if saved.
    ///
    /// # Errors
    /// Returns [`PairStoreError`] on malformed stored data or any underlying
    /// `SQLite` failure.
    pub fn get_probes(
        &self,
        comparison_id: &ComparisonId,
    ) -> Result<Vec<ProbeRecord>, PairStoreError> {
        let result = (|| {
            let guard = self.lock()?;
            let mut stmt = guard
                .prepare(
                    "SELECT id, comparison_id, ts, side, url, envelope_json \
                     FROM probes WHERE comparison_id = ?1",
                )
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            let rows = stmt
                .query_map(params![comparison_id.as_str()], |row| {
                    let id: String = row.get(0)?;
                    let comparison_id: String = row.get(1)?;
                    let ts: i64 = row.get(2)?;
                    let side: String = row.get(3)?;
                    let url: String = row.get(4)?;
                    let envelope_json: String = row.get(5)?;
                    Ok((id, comparison_id, ts, side, url, envelope_json))
                })
                .map_err(|err| PairStoreError::Db(err.to_string()))?;
            let mut out = Vec::new();
            for (_, comparison_id, ts, side, url, envelope_json) in rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| PairStoreError::Db(err.to_string()))?
            {
                let side = parse_side(&side)?;
                let comparison_id = ComparisonId::from_raw(comparison_id);
                let envelope: SignalEnvelope = serde_json::from_str(&envelope_json)
                    .map_err(|err| PairStoreError::Invalid(err.to_string()))?;
                out.push(ProbeRecord {
                    id: ProbeId::derive(&comparison_id, side),
                    comparison_id,
                    created_at: ts,
                    side,
                    url,
                    envelope,
                });
            }
            Ok(out)
        })();
        self.record_op(result)
    }
}

fn apply_pragmas(connection: &Connection) -> Result<(), PairStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
        .map_err(|err| PairStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .map_err(|err| PairStoreError::Db(err.to_string()))?;
    Ok(())
}

fn initialize_schema(connection: &Connection) -> Result<(), PairStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS comparisons (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                left_url TEXT NOT NULL,
                right_url TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
                result_json TEXT,
                error_json TEXT
            );
            CREATE TABLE IF NOT EXISTS probes (
                id TEXT PRIMARY KEY,
                comparison_id TEXT NOT NULL REFERENCES comparisons(id) ON DELETE CASCADE,
                ts INTEGER NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('left', 'right')),
                url TEXT NOT NULL,
                envelope_json TEXT NOT NULL,
                UNIQUE(comparison_id, side)
            );
            CREATE INDEX IF NOT EXISTS idx_comparisons_ts ON comparisons(ts DESC);
            CREATE INDEX IF NOT EXISTS idx_comparisons_status ON comparisons(status);
            CREATE INDEX IF NOT EXISTS idx_probes_comparison_id ON probes(comparison_id);
            CREATE INDEX IF NOT EXISTS idx_probes_side ON probes(side);",
        )
        .map_err(|err| PairStoreError::Db(err.to_string()))
}

fn now_millis() -> i64 {
    driftwatch_core::epoch_millis(driftwatch_core::now())
}

fn parse_side(value: &str) -> Result<Side, PairStoreError> {
    match value {
        "left" => Ok(Side::Left),
        "right" => Ok(Side::Right),
        other => Err(PairStoreError::Invalid(format!("unknown side: {other}"))),
    }
}

/// A comparison row before its JSON columns are parsed and validated.
struct RawComparisonRow {
    id: String,
    ts: i64,
    left_url: String,
    right_url: String,
    status: String,
    result_json: Option<String>,
    error_json: Option<String>,
}

impl RawComparisonRow {
    fn into_comparison(self) -> Result<Comparison, PairStoreError> {
        let status = match self.status.as_str() {
            "running" => ComparisonStatus::Running,
            "completed" => ComparisonStatus::Completed,
            "failed" => ComparisonStatus::Failed,
            other => return Err(PairStoreError::Invalid(format!("unknown status: {other}"))),
        };
        let result = self
            .result_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err: serde_json::Error| PairStoreError::Invalid(err.to_string()))?;
        let error = self.error_json.as_deref().map(deserialize_stored_error).transpose()?;
        Ok(Comparison {
            id: ComparisonId::from_raw(self.id),
            created_at: self.ts,
            left_url: self.left_url,
            right_url: self.right_url,
            status,
            result,
            error,
        })
    }
}

/// Deserializes a stored error, accepting both the current `{code,
/// message, details?}` shape and legacy plain-string errors (wrapped as
/// `internal_error`).
fn deserialize_stored_error(raw: &str) -> Result<StoredError, PairStoreError> {
    if let Ok(error) = serde_json::from_str::<StoredError>(raw) {
        return Ok(error);
    }
    if let Ok(message) = serde_json::from_str::<String>(raw) {
        return Ok(StoredError { code: CompareErrorCode::InternalError, message, details: None });
    }
    Err(PairStoreError::Invalid(format!("unparseable stored error: {raw}")))
}

fn row_to_raw_comparison(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawComparisonRow> {
    Ok(RawComparisonRow {
        id: row.get(0)?,
        ts: row.get(1)?,
        left_url: row.get(2)?,
        right_url: row.get(3)?,
        status: row.get(4)?,
        result_json: row.get(5)?,
        error_json: row.get(6)?,
    })
}

fn query_comparison_row(
    connection: &Connection,
    comparison_id: &ComparisonId,
) -> Result<Option<Comparison>, PairStoreError> {
    let raw = connection
        .query_row(
            "SELECT id, ts, left_url, right_url, status, result_json, error_json \
             FROM comparisons WHERE id = ?1",
            params![comparison_id.as_str()],
            row_to_raw_comparison,
        )
        .optional()
        .map_err(|err| PairStoreError::Db(err.to_string()))?;
    raw.map(RawComparisonRow::into_comparison).transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use driftwatch_core::PairKey;

    use super::*;

    fn new_id() -> ComparisonId {
        ComparisonId::generate(&PairKey::compute("https://a.example.com", "https://b.example.com"))
    }

    #[test]
    fn create_comparison_is_running_with_no_result() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        let comparison = store.get_comparison(&id).unwrap().unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Running);
        assert!(comparison.result.is_none());
        assert!(comparison.error.is_none());
    }

    #[test]
    fn save_result_marks_completed() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        store.save_result(&id, &serde_json::json!({"ok": true})).unwrap();
        let comparison = store.get_comparison(&id).unwrap().unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Completed);
        assert_eq!(comparison.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn fail_comparison_clears_result_and_sets_error() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        store.save_result(&id, &serde_json::json!({"ok": true})).unwrap();
        let error =
            StoredError { code: CompareErrorCode::FetchError, message: "boom".to_string(), details: None };
        store.fail_comparison(&id, &error).unwrap();
        let comparison = store.get_comparison(&id).unwrap().unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Failed);
        assert!(comparison.result.is_none());
        assert_eq!(comparison.error.as_ref().map(|e| &e.message), Some(&"boom".to_string()));
    }

    #[test]
    fn get_comparison_returns_none_on_miss() {
        let store = PairStore::open_in_memory().unwrap();
        assert!(store.get_comparison(&new_id()).unwrap().is_none());
    }

    #[test]
    fn legacy_plain_string_error_deserializes_as_internal_error() {
        assert_eq!(
            deserialize_stored_error("\"disk is full\"").unwrap(),
            StoredError {
                code: CompareErrorCode::InternalError,
                message: "disk is full".to_string(),
                details: None,
            },
        );
    }

    #[test]
    fn get_comparisons_for_history_only_returns_completed_newest_first() {
        let store = PairStore::open_in_memory().unwrap();
        let running = new_id();
        store.create_comparison(&running, "https://a.example.com", "https://b.example.com").unwrap();

        let completed = new_id();
        store.create_comparison(&completed, "https://a.example.com", "https://b.example.com").unwrap();
        store.save_result(&completed, &serde_json::json!({"ok": true})).unwrap();

        let history = store.get_comparisons_for_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, completed);
    }

    #[test]
    fn save_probe_twice_yields_exactly_one_row() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        let envelope = sample_envelope(&id, Side::Left);
        store.save_probe(&id, Side::Left, &envelope).unwrap();
        store.save_probe(&id, Side::Left, &envelope).unwrap();
        let probes = store.get_probes(&id).unwrap();
        assert_eq!(probes.len(), 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_retention_limit() {
        let store = PairStore::open_in_memory().unwrap();
        let ids: Vec<ComparisonId> = (0..RETENTION_LIMIT + 1)
            .map(|_| {
                let id = new_id();
                store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
                id
            })
            .collect();

        let oldest = &ids[0];
        assert!(store.get_comparison(oldest).unwrap().is_none(), "oldest comparison should have been evicted");
        for newer in &ids[1..] {
            assert!(store.get_comparison(newer).unwrap().is_some(), "newer comparison should still be present");
        }
    }

    #[test]
    fn ring_buffer_eviction_increments_eviction_counter_exactly_once() {
        let store = PairStore::open_in_memory().unwrap();
        for _ in 0..RETENTION_LIMIT + 1 {
            let id = new_id();
            store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        }
        assert_eq!(store.op_counts().evictions, 1);
    }

    #[test]
    fn op_counts_tracks_attempted_and_succeeded() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        store.save_probe(&id, Side::Left, &sample_envelope(&id, Side::Left)).unwrap();

        let counts = store.op_counts();
        assert_eq!(counts.attempted, 2);
        assert_eq!(counts.succeeded, 2);
        assert_eq!(counts.evictions, 0);
    }

    #[test]
    fn readiness_succeeds_against_a_live_connection() {
        let store = PairStore::open_in_memory().unwrap();
        assert!(store.readiness().is_ok());
    }

    #[test]
    fn ring_buffer_eviction_also_removes_probes() {
        let store = PairStore::open_in_memory().unwrap();
        let oldest = new_id();
        store.create_comparison(&oldest, "https://a.example.com", "https://b.example.com").unwrap();
        store.save_probe(&oldest, Side::Left, &sample_envelope(&oldest, Side::Left)).unwrap();

        for _ in 0..RETENTION_LIMIT {
            let id = new_id();
            store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();
        }

        assert!(store.get_comparison(&oldest).unwrap().is_none());
        assert!(store.get_probes(&oldest).unwrap().is_empty());
    }

    #[test]
    fn get_comparison_rewrites_stale_running_to_failed() {
        let store = PairStore::open_in_memory().unwrap();
        let id = new_id();
        store.create_comparison(&id, "https://a.example.com", "https://b.example.com").unwrap();

        let backdated = now_millis() - STALE_THRESHOLD_MS - 1_000;
        store
            .connection
            .lock()
            .unwrap()
            .execute("UPDATE comparisons SET ts = ?1 WHERE id = ?2", params![backdated, id.as_str()])
            .unwrap();

        let comparison = store.get_comparison(&id).unwrap().unwrap();
        assert_eq!(comparison.status, ComparisonStatus::Failed);
        assert_eq!(comparison.error.as_ref().map(|e| e.code), Some(CompareErrorCode::Timeout));
    }

    fn sample_envelope(id: &ComparisonId, side: Side) -> SignalEnvelope {
        SignalEnvelope {
            schema_version: driftwatch_core::SCHEMA_VERSION,
            comparison_id: id.clone(),
            probe_id: ProbeId::derive(id, side),
            side,
            requested_url: "https://example.com".to_string(),
            captured_at: "2024-01-01T00:00:00Z".to_string(),
            cf_context: None,
            result: driftwatch_core::ProbeResult::NetworkFailure {
                error: driftwatch_core::NetworkErrorInfo {
                    code: driftwatch_core::ProbeErrorCode::Timeout,
                    message: "timed out".to_string(),
                    details: None,
                },
                duration_ms: Some(9_000),
            },
        }
    }
}
