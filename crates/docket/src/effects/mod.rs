//! Idempotent side effects.
//!
//! [`EffectKey`] derives a deterministic identity for one side effect from
//! the run, step, entity ids and the hash of the content the step is
//! idempotent over. [`EffectCache`] executes a closure at most once per key
//! and replays the recorded response afterwards.

mod cache;
mod key;

pub use cache::{EffectCache, EffectError, EffectOutcome};
pub use key::{EffectKey, EffectKeyError};
