//! Repository layer for database persistence.
//!
//! All database access uses Diesel with diesel-async. SQLite is the default
//! backend; PostgreSQL is available behind the `postgres` feature.

pub mod artifacts;
pub mod blocks;
pub mod context;
pub mod documents;
pub mod migrations;
pub mod models;
pub mod ocr;
pub mod pool;
pub mod runs;
pub mod side_effects;
pub mod util;

pub use artifacts::ArtifactRepository;
pub use blocks::{BlockLedgerError, BlockRepository};
pub use context::DbContext;
pub use documents::{DocumentRepository, ReserveOptions, Reservation};
pub use ocr::OcrRepository;
pub use pool::{DbPool, DieselError};
pub use runs::WorkflowRepository;
pub use side_effects::SideEffectRepository;

/// Bundled repository access for all database operations.
#[derive(Clone)]
pub struct Repositories {
    pub documents: DocumentRepository,
    pub blocks: BlockRepository,
    pub artifacts: ArtifactRepository,
    pub ocr: OcrRepository,
    pub workflow: WorkflowRepository,
    pub side_effects: SideEffectRepository,
    pool: DbPool,
}

impl Repositories {
    pub fn new(ctx: &DbContext) -> Self {
        Self {
            documents: ctx.documents(),
            blocks: ctx.blocks(),
            artifacts: ctx.artifacts(),
            ocr: ctx.ocr(),
            workflow: ctx.workflow(),
            side_effects: ctx.side_effects(),
            pool: ctx.pool().clone(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub(crate) fn json_error(e: serde_json::Error) -> DieselError {
    DieselError::DeserializationError(Box::new(e))
}
