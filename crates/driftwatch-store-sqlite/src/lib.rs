// crates/driftwatch-store-sqlite/src/lib.rs
// ============================================================================
// Module: Pair Store
// Description: Durable, per-pair SQLite storage for comparisons and probes.
// Purpose: Re-export the store's public surface.
// Dependencies: driftwatch-core, rusqlite, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! One [`PairStore`] instance owns one `SQLite` database file, keyed by the
//! pair fingerprint (see [`driftwatch_core::PairKey`]). All writes for a
//! given pair go through a single instance, so the Gateway and Orchestrator
//! never contend on the same file from two processes.

#![deny(missing_docs)]

mod store;

pub use store::PairStore;
pub use store::PairStoreError;
pub use store::PairStoreOpCounts;
