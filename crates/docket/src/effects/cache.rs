use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use super::key::EffectKey;
use crate::repository::models::NewSideEffect;
use crate::repository::pool::{DbPool, DieselError, SqliteConn};
use crate::repository::side_effects::SideEffectRepository;
use crate::repository::util::{is_lock_contention, now_rfc3339};
use crate::schema::{effect_lock, side_effect};
use crate::with_conn;

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),
    #[error("effect response serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("effect {key} is held by another attempt")]
    Contention { key: String },
    #[error("effect failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl EffectError {
    /// True when retrying later may succeed without any change in input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EffectError::Contention { .. })
    }
}

/// Result of [`EffectCache::call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectOutcome<T> {
    pub response: T,
    /// True when the response came from a prior recorded execution.
    pub replayed: bool,
}

/// Executes side-effecting closures at most once per [`EffectKey`].
///
/// Two layers of exclusion apply. Inside one process, calls for the same key
/// queue on a per-key async mutex that is evicted once no caller holds or
/// awaits it. Across processes, each call runs inside a database transaction
/// that first takes a lock scoped to the key (a transaction-level advisory
/// lock on PostgreSQL, the database write lock on SQLite), then checks
/// `side_effect` for a recorded response.
///
/// When the closure fails the transaction rolls back and nothing is recorded,
/// so a later call with the same key runs the closure again. The cache only
/// guarantees that completion is recorded once: closures must make their own
/// external writes safe to re-apply (content-addressed puts, hash-keyed
/// upserts).
#[derive(Clone)]
pub struct EffectCache {
    pool: DbPool,
    guards: Arc<KeyGuards>,
}

impl EffectCache {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            guards: Arc::new(KeyGuards::default()),
        }
    }

    /// Run `effect` unless a response is already recorded for `key`.
    pub async fn call<T, F, Fut>(
        &self,
        key: &EffectKey,
        effect: F,
    ) -> Result<EffectOutcome<T>, EffectError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let _lease = self.guards.acquire(key.as_str()).await;
        let key_str = key.as_str();

        let result: Result<EffectOutcome<T>, EffectError> = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    conn.lock_effect_key(key_str).await?;

                    let recorded: Option<String> = side_effect::table
                        .find(key_str)
                        .select(side_effect::response_json)
                        .first::<String>(conn)
                        .await
                        .optional()?;

                    if let Some(json) = recorded {
                        let response: T = serde_json::from_str(&json)?;
                        return Ok::<_, EffectError>(EffectOutcome {
                            response,
                            replayed: true,
                        });
                    }

                    let response = effect().await.map_err(EffectError::Failed)?;
                    let json = serde_json::to_string(&response)?;
                    let now = now_rfc3339();
                    diesel::insert_into(side_effect::table)
                        .values(&NewSideEffect {
                            effect_key: key_str,
                            response_json: &json,
                            created_at: &now,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    Ok::<_, EffectError>(EffectOutcome {
                        response,
                        replayed: false,
                    })
                })
            })
            .await
        });

        match result {
            Ok(outcome) => {
                if outcome.replayed {
                    debug!("Replayed recorded effect {}", key);
                } else {
                    debug!("Recorded effect {}", key);
                }
                Ok(outcome)
            }
            Err(EffectError::Database(e)) if is_lock_contention(&e) => {
                Err(EffectError::Contention {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Read the recorded response for `key` without executing anything.
    pub async fn lookup<T: DeserializeOwned>(
        &self,
        key: &EffectKey,
    ) -> Result<Option<T>, EffectError> {
        let repo = SideEffectRepository::new(self.pool.clone());
        match repo.get(key.as_str()).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Number of keys with a live in-process guard.
    pub fn in_flight(&self) -> usize {
        self.guards.len()
    }
}

/// Takes the cross-process lock for one effect key inside the current transaction.
#[async_trait]
trait EffectKeyLock {
    async fn lock_effect_key(&mut self, key: &str) -> Result<(), DieselError>;
}

#[async_trait]
impl EffectKeyLock for SqliteConn {
    async fn lock_effect_key(&mut self, key: &str) -> Result<(), DieselError> {
        // First write of the transaction: SQLite takes the database write
        // lock here and holds it until commit or rollback.
        let now = now_rfc3339();
        diesel::insert_into(effect_lock::table)
            .values((
                effect_lock::effect_key.eq(key),
                effect_lock::acquired_at.eq(&now),
            ))
            .on_conflict(effect_lock::effect_key)
            .do_update()
            .set(effect_lock::acquired_at.eq(&now))
            .execute(&mut *self)
            .await?;
        Ok(())
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl EffectKeyLock for diesel_async::AsyncPgConnection {
    async fn lock_effect_key(&mut self, key: &str) -> Result<(), DieselError> {
        diesel::sql_query("SET LOCAL lock_timeout = '30s'")
            .execute(&mut *self)
            .await?;
        diesel::sql_query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind::<diesel::sql_types::Text, _>(key)
            .execute(&mut *self)
            .await?;
        Ok(())
    }
}

type Slot = Arc<AsyncMutex<()>>;

/// Per-key async mutexes, created on demand and evicted when unused.
#[derive(Default)]
struct KeyGuards {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyGuards {
    async fn acquire(self: &Arc<Self>, key: &str) -> KeyLease {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyLease {
            key: key.to_string(),
            guards: Arc::clone(self),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct KeyLease {
    key: String,
    guards: Arc<KeyGuards>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        // Release the mutex before checking whether anyone else still holds the slot.
        self.guard.take();
        let mut slots = self
            .guards
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_guards_serialize_and_evict() {
        let guards = Arc::new(KeyGuards::default());
        let first = guards.acquire("k").await;
        assert_eq!(guards.len(), 1);

        let waiter = {
            let guards = Arc::clone(&guards);
            tokio::spawn(async move {
                let _lease = guards.acquire("k").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(guards.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let guards = Arc::new(KeyGuards::default());
        let _a = guards.acquire("a").await;
        let _b = guards.acquire("b").await;
        assert_eq!(guards.len(), 2);
    }
}
