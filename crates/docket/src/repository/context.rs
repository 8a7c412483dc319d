//! Database context: owns the pool and hands out repositories.

use std::path::Path;

use super::artifacts::ArtifactRepository;
use super::blocks::BlockRepository;
use super::documents::DocumentRepository;
use super::migrations::run_migrations;
use super::ocr::OcrRepository;
use super::pool::{DbPool, DieselError};
use super::runs::WorkflowRepository;
use super::side_effects::SideEffectRepository;
use super::Repositories;
use crate::effects::EffectCache;

/// Create one context per command or service, then use it to access all
/// repositories.
///
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:/var/lib/docket/docket.db")?;
/// ctx.migrate().await?;
/// let doc = ctx.documents().get_document(&doc_id).await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: DbPool,
    database_url: String,
    effects: EffectCache,
}

impl DbContext {
    /// Supports `sqlite:` URLs, bare file paths, and `postgres://` URLs.
    pub fn from_url(database_url: &str) -> Result<Self, DieselError> {
        let pool = DbPool::from_url(database_url)?;
        Ok(Self {
            effects: EffectCache::new(pool.clone()),
            pool,
            database_url: database_url.to_string(),
        })
    }

    pub fn from_sqlite_path(db_path: &Path) -> Result<Self, DieselError> {
        Self::from_url(&format!("sqlite:{}", db_path.display()))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Apply pending schema migrations. Returns the names applied.
    pub async fn migrate(&self) -> Result<Vec<String>, DieselError> {
        run_migrations(&self.database_url).await
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    pub fn blocks(&self) -> BlockRepository {
        BlockRepository::new(self.pool.clone())
    }

    pub fn artifacts(&self) -> ArtifactRepository {
        ArtifactRepository::new(self.pool.clone())
    }

    pub fn ocr(&self) -> OcrRepository {
        OcrRepository::new(self.pool.clone())
    }

    pub fn workflow(&self) -> WorkflowRepository {
        WorkflowRepository::new(self.pool.clone())
    }

    pub fn side_effects(&self) -> SideEffectRepository {
        SideEffectRepository::new(self.pool.clone())
    }

    /// Every clone shares one set of per-key guards, so callers in this
    /// process serialize on the same key.
    pub fn effect_cache(&self) -> EffectCache {
        self.effects.clone()
    }

    pub fn repositories(&self) -> Repositories {
        Repositories::new(self)
    }
}
