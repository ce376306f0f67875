//! Mirrors live reports into the durable store.
//!
//! A sync is an idempotent upsert keyed by report id followed by entity
//! processing of the report's current HTML. It is the only place entity
//! processing is started from.

pub mod reconciler;

pub use reconciler::{ReconcileResult, Reconciler, SyncOutcome, SyncState};
