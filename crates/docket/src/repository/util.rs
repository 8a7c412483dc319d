//! Small helpers shared by the repositories.

use diesel::result::Error as DieselError;
use url::Url;

/// Wrap a connection or pool failure that has no Diesel error of its own.
pub fn backend_error(e: impl std::fmt::Display) -> DieselError {
    DieselError::QueryBuilderError(e.to_string().into())
}

pub fn is_postgres_url(url: &str) -> bool {
    matches!(url.split_once("://"), Some(("postgres" | "postgresql", _)))
}

/// SQLite's `database is locked` after busy_timeout, or PostgreSQL's `lock_timeout`.
pub fn is_lock_contention(err: &DieselError) -> bool {
    const MARKERS: [&str; 4] = [
        "database is locked",
        "database table is locked",
        "lock timeout",
        "could not obtain lock",
    ];
    match err {
        DieselError::DatabaseError(..) | DieselError::QueryBuilderError(_) => {
            let message = err.to_string().to_ascii_lowercase();
            MARKERS.iter().any(|marker| message.contains(marker))
        }
        _ => false,
    }
}

/// Timestamp format of every `*_at` column.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Mask the password of a database URL before it reaches a log line.
pub fn redact_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            url.to_string()
        }
        _ => raw.to_string(),
    }
}
