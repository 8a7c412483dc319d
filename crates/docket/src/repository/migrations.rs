//! Database migrations using cetane.
//!
//! Runs migrations via blocking tasks to work with async connections.

use cetane::migrator::MigrationStateStore;
use tracing::info;

use super::pool::DieselError;
use super::util::is_postgres_url;

/// Run pending migrations for a database URL. Returns the names applied.
pub async fn run_migrations(database_url: &str) -> Result<Vec<String>, DieselError> {
    if is_postgres_url(database_url) {
        #[cfg(feature = "postgres")]
        {
            run_postgres_migrations(database_url).await
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(migration_error(
                "PostgreSQL support not compiled. Use --features postgres",
            ))
        }
    } else {
        run_sqlite_migrations(database_url).await
    }
}

fn migration_error(msg: impl std::fmt::Display) -> DieselError {
    DieselError::QueryBuilderError(msg.to_string().into())
}

fn log_applied(applied: &[String]) {
    for name in applied {
        info!("Applied migration: {}", name);
    }
    if applied.is_empty() {
        info!("No pending migrations");
    }
}

async fn run_sqlite_migrations(database_url: &str) -> Result<Vec<String>, DieselError> {
    use cetane::backend::Sqlite;
    use cetane::migrator::Migrator;

    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
        .to_string();

    let applied = tokio::task::spawn_blocking(move || {
        let conn = rusqlite::Connection::open(&path).map_err(migration_error)?;
        // WAL lets readers proceed while an effect transaction holds the write lock.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(migration_error)?;

        let backend = Sqlite;
        let registry = crate::migrations::registry();
        let state = SqliteState::new(&conn)?;

        let mut migrator = Migrator::new(&registry, &backend, state);
        let applied = migrator
            .migrate_forward(|sql| conn.execute_batch(sql).map_err(|e| e.to_string()))
            .map_err(migration_error)?;
        Ok::<_, DieselError>(
            applied
                .into_iter()
                .map(|name| name.to_string())
                .collect::<Vec<String>>(),
        )
    })
    .await
    .map_err(|e| DieselError::QueryBuilderError(Box::new(e)))??;

    log_applied(&applied);
    Ok(applied)
}

#[cfg(feature = "postgres")]
async fn run_postgres_migrations(database_url: &str) -> Result<Vec<String>, DieselError> {
    use cetane::backend::Postgres;
    use cetane::migrator::Migrator;

    let (client, connection) = tokio_postgres::connect(database_url, tokio_postgres::NoTls)
        .await
        .map_err(migration_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!("Migration connection closed with error: {}", e);
        }
    });

    let backend = Postgres;
    let registry = crate::migrations::registry();
    let state = PostgresState::new(&client).await?;

    let mut migrator = Migrator::new(&registry, &backend, state);
    let applied = migrator
        .migrate_forward(|sql| block_on_pg(client.batch_execute(sql)))
        .map_err(migration_error)?;

    let applied: Vec<String> = applied.into_iter().map(|name| name.to_string()).collect();
    log_applied(&applied);
    Ok(applied)
}

/// Drive a tokio-postgres future from the synchronous migrator callbacks.
#[cfg(feature = "postgres")]
fn block_on_pg<F>(fut: F) -> Result<(), String>
where
    F: std::future::Future<Output = Result<(), tokio_postgres::Error>> + Send,
{
    let rt = tokio::runtime::Handle::current();
    std::thread::scope(|s| {
        s.spawn(|| rt.block_on(fut).map_err(|e| e.to_string()))
            .join()
            .map_err(|_| "thread panicked".to_string())?
    })
}

// -- SQLite state store --

struct SqliteState<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteState<'a> {
    fn new(conn: &'a rusqlite::Connection) -> Result<Self, DieselError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                name TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .map_err(migration_error)?;

        Ok(Self { conn })
    }
}

impl MigrationStateStore for SqliteState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __cetane_migrations ORDER BY name")
            .map_err(|e| e.to_string())?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| e.to_string())?;

        Ok(names)
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO __cetane_migrations (name) VALUES (?1)",
                [name],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM __cetane_migrations WHERE name = ?1", [name])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

// -- PostgreSQL state store --

#[cfg(feature = "postgres")]
struct PostgresState<'a> {
    client: &'a tokio_postgres::Client,
    applied: Vec<String>,
}

#[cfg(feature = "postgres")]
impl<'a> PostgresState<'a> {
    async fn new(client: &'a tokio_postgres::Client) -> Result<Self, DieselError> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS __cetane_migrations (
                    name TEXT PRIMARY KEY NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .await
            .map_err(migration_error)?;

        let rows = client
            .query("SELECT name FROM __cetane_migrations ORDER BY name", &[])
            .await
            .map_err(migration_error)?;
        let applied = rows.iter().map(|r| r.get::<_, String>(0)).collect();

        Ok(Self { client, applied })
    }
}

#[cfg(feature = "postgres")]
impl MigrationStateStore for PostgresState<'_> {
    fn applied_migrations(&mut self) -> Result<Vec<String>, String> {
        Ok(self.applied.clone())
    }

    fn mark_applied(&mut self, name: &str) -> Result<(), String> {
        let client = self.client;
        let owned = name.to_string();
        block_on_pg(async move {
            client
                .execute(
                    "INSERT INTO __cetane_migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
                    &[&owned],
                )
                .await
                .map(|_| ())
        })?;
        if !self.applied.iter().any(|n| n == name) {
            self.applied.push(name.to_string());
        }
        Ok(())
    }

    fn mark_unapplied(&mut self, name: &str) -> Result<(), String> {
        let client = self.client;
        let owned = name.to_string();
        block_on_pg(async move {
            client
                .execute("DELETE FROM __cetane_migrations WHERE name = $1", &[&owned])
                .await
                .map(|_| ())
        })?;
        self.applied.retain(|n| n != name);
        Ok(())
    }
}
