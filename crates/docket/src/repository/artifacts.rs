//! Artifact rows: one per (run, artifact type).

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{ArtifactRecord, NewArtifact};
use super::pool::{DbPool, DieselError};
use super::util::now_rfc3339;
use crate::artifacts::Artifact;
use crate::schema::artifact;
use crate::with_conn;

#[derive(Clone)]
pub struct ArtifactRepository {
    pool: DbPool,
}

impl ArtifactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert-or-ignore. Returns true when the row was created by this call.
    pub async fn insert(&self, artifact: &Artifact) -> Result<bool, DieselError> {
        let prov = serde_json::to_string(&artifact.prov).map_err(super::json_error)?;
        let now = now_rfc3339();
        let row = NewArtifact {
            artifact_id: &artifact.artifact_id,
            run_id: artifact.run_id.as_str(),
            artifact_type: artifact.artifact_type.as_str(),
            format: &artifact.format,
            uri: &artifact.uri,
            sha256: artifact.sha256.as_str(),
            prov: &prov,
            created_at: &now,
        };
        with_conn!(self.pool, conn, {
            let rows = diesel::insert_into(artifact::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    pub async fn get(&self, artifact_id: &str) -> Result<Option<ArtifactRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            artifact::table
                .find(artifact_id)
                .select(ArtifactRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }

    pub async fn count_by_run(&self, run_id: &str) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            artifact::table
                .filter(artifact::run_id.eq(run_id))
                .select(count_star())
                .first(&mut conn)
                .await
        })
    }

    pub async fn list_by_run(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            artifact::table
                .filter(artifact::run_id.eq(run_id))
                .order(artifact::artifact_id.asc())
                .select(ArtifactRecord::as_select())
                .load(&mut conn)
                .await
        })
    }
}
