//! Read access to recorded effect responses.
//!
//! Writes go through [`crate::effects::EffectCache`] only.

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{DbPool, DieselError};
use crate::schema::side_effect;
use crate::with_conn;

#[derive(Clone)]
pub struct SideEffectRepository {
    pool: DbPool,
}

impl SideEffectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Recorded response JSON for an effect key.
    pub async fn get(&self, effect_key: &str) -> Result<Option<String>, DieselError> {
        with_conn!(self.pool, conn, {
            side_effect::table
                .find(effect_key)
                .select(side_effect::response_json)
                .first::<String>(&mut conn)
                .await
                .optional()
        })
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            side_effect::table
                .select(count_star())
                .first(&mut conn)
                .await
        })
    }

    /// Keys recorded by one run, in key order.
    pub async fn keys_for_run(&self, run_id: &str) -> Result<Vec<String>, DieselError> {
        let prefix = format!("{}|", run_id);
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let keys: Vec<String> = with_conn!(self.pool, conn, {
            side_effect::table
                .filter(side_effect::effect_key.like(&pattern).escape('\\'))
                .select(side_effect::effect_key)
                .order(side_effect::effect_key.asc())
                .load(&mut conn)
                .await
        })?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect())
    }
}
