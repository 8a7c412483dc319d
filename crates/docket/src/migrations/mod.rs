//! Schema migrations, registered with cetane and applied by
//! [`crate::repository::migrations::run_migrations`].

use cetane::migration::MigrationRegistry;

mod m0001_documents;
mod m0002_side_effects;
mod m0003_ocr;
mod m0004_artifacts_and_runs;

/// All migrations in dependency order.
pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_documents::migration());
    reg.register(m0002_side_effects::migration());
    reg.register(m0003_ocr::migration());
    reg.register(m0004_artifacts_and_runs::migration());
    reg
}
