//! Connection sources for SQLite and PostgreSQL.
//!
//! [`DbPool`] picks its backend from the database URL. SQLite connections
//! are opened per operation with `busy_timeout` set, so concurrent writers
//! wait for the lock instead of failing at once.

use std::time::Duration;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::{backend_error, is_postgres_url};

pub type DieselError = diesel::result::Error;

pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(feature = "postgres")]
const PG_MAX_CONNECTIONS: usize = 10;

/// Opens SQLite connections on demand.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: String,
    busy_timeout: Duration,
}

impl SqliteConnector {
    /// Accepts `sqlite://path`, `sqlite:path` or a bare path.
    pub fn new(database_url: &str) -> Self {
        let path = ["sqlite://", "sqlite:"]
            .iter()
            .find_map(|scheme| database_url.strip_prefix(scheme))
            .unwrap_or(database_url);
        Self {
            path: path.to_string(),
            busy_timeout: SQLITE_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.path)
            .await
            .map_err(backend_error)?;
        let pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        conn.batch_execute(&pragmas).await?;
        Ok(conn)
    }
}

/// Deadpool-managed PostgreSQL connections.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgConnector {
    pool: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgConnector {
    pub fn new(database_url: &str) -> Result<Self, DieselError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        DeadPool::builder(manager)
            .max_size(PG_MAX_CONNECTIONS)
            .build()
            .map(|pool| Self { pool })
            .map_err(backend_error)
    }

    pub async fn get(&self) -> Result<PgConn, DieselError> {
        self.pool.get().await.map_err(backend_error)
    }
}

#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqliteConnector),
    #[cfg(feature = "postgres")]
    Postgres(PgConnector),
}

impl DbPool {
    /// `postgres://` and `postgresql://` need the `postgres` feature; any
    /// other URL is treated as SQLite.
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        if !is_postgres_url(url) {
            return Ok(DbPool::Sqlite(SqliteConnector::new(url)));
        }
        #[cfg(feature = "postgres")]
        {
            PgConnector::new(url).map(DbPool::Postgres)
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(backend_error(
                "this build has no PostgreSQL support; rebuild with --features postgres",
            ))
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DbPool::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => "postgres",
        }
    }
}

/// Expand `$body` once per backend with `$conn` bound to a live connection.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                #[allow(unused_mut)]
                let mut $conn = pool.get().await?;
                $body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                #[allow(unused_mut)]
                let mut $conn = pool.get().await?;
                $body
            }
        }
    }};
}

/// Like [`with_conn!`] with a separate body per backend.
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sqlite_conn:ident => $sqlite_body:expr, postgres: $pg_conn:ident => $pg_body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                #[allow(unused_mut)]
                let mut $sqlite_conn = pool.get().await?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(pool) => {
                #[allow(unused_mut)]
                let mut $pg_conn = pool.get().await?;
                $pg_body
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(DbPool::from_url("/srv/docket.db").unwrap().backend(), "sqlite");
        assert_eq!(DbPool::from_url("sqlite:/srv/docket.db").unwrap().backend(), "sqlite");

        #[cfg(feature = "postgres")]
        assert_eq!(
            DbPool::from_url("postgres://localhost/docket").unwrap().backend(),
            "postgres"
        );
        #[cfg(not(feature = "postgres"))]
        assert!(DbPool::from_url("postgres://localhost/docket").is_err());
    }

    #[test]
    fn test_sqlite_scheme_stripped() {
        assert_eq!(SqliteConnector::new("sqlite:///tmp/a.db").path(), "/tmp/a.db");
        assert_eq!(SqliteConnector::new("sqlite:a.db").path(), "a.db");
        assert_eq!(SqliteConnector::new("a.db").path(), "a.db");
    }

    #[test]
    fn test_busy_timeout_override() {
        let connector = SqliteConnector::new("a.db").with_busy_timeout(Duration::from_millis(50));
        assert_eq!(connector.busy_timeout, Duration::from_millis(50));
    }
}
