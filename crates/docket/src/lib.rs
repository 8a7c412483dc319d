//! Crash-safe document ingestion core.
//!
//! Holds everything the pipeline needs to be safely re-invoked: deterministic
//! effect keys, the idempotent effect cache, content-addressed document
//! reservation, the block ledger, artifact provenance, and the object store.

pub mod artifacts;
pub mod blocks;
pub mod config;
pub mod effects;
pub mod hashing;
pub mod ids;
pub mod migrations;
pub mod repository;
pub mod schema;
pub mod storage;

pub use config::{Config, Settings};
pub use effects::{EffectCache, EffectError, EffectKey, EffectOutcome};
pub use ids::{DocId, PageIdx, PageNo, RunId, Sha256Hex};
pub use repository::{DbContext, DbPool, DieselError, Repositories};
