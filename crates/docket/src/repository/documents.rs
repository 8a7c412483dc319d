//! Content-addressed document reservation.
//!
//! The document id is derived from the raw bytes, so the same content always
//! lands on the same document. Every reservation allocates the next version
//! number inside one transaction; concurrent reservations of the same content
//! get distinct, contiguous versions.

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{DocRecord, DocVersionRecord, NewDoc, NewDocVersion};
use super::pool::{DbPool, DieselError};
use super::util::now_rfc3339;
use crate::ids::{DocId, Sha256Hex};
use crate::schema::{doc, doc_version};
use crate::with_conn;

/// Filename recorded when the caller does not supply one.
pub const DEFAULT_FILENAME: &str = "inline.txt";

/// MIME type recorded when content sniffing finds nothing.
pub const DEFAULT_MIME: &str = "text/plain";

#[derive(Debug, Clone, Default)]
pub struct ReserveOptions {
    pub filename: Option<String>,
    pub mime: Option<String>,
    /// Hash of the parser configuration the version will be parsed with.
    pub parser_config_sha: Option<Sha256Hex>,
}

/// Identity of a reserved document version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub doc_id: DocId,
    pub version: i64,
    pub raw_sha: Sha256Hex,
    pub filename: String,
    pub mime: String,
    pub parser_config_sha: Sha256Hex,
}

/// Detect a MIME type from magic bytes.
pub fn sniff_mime(raw: &[u8]) -> String {
    infer::get(raw)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME.to_string())
}

/// Parser config hash used when the caller has none: the hash of `{}`.
pub fn default_parser_config_sha() -> Sha256Hex {
    Sha256Hex::digest(b"{}")
}

#[derive(Clone)]
pub struct DocumentRepository {
    pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register `raw` as a new version of its content-addressed document.
    pub async fn reserve(
        &self,
        raw: &[u8],
        options: &ReserveOptions,
    ) -> Result<Reservation, DieselError> {
        let raw_sha = Sha256Hex::digest(raw);
        let doc_id = DocId::from_raw_sha(&raw_sha);
        let filename = options
            .filename
            .clone()
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let mime = options.mime.clone().unwrap_or_else(|| sniff_mime(raw));
        let parser_config_sha = options
            .parser_config_sha
            .clone()
            .unwrap_or_else(default_parser_config_sha);
        let byte_len = i64::try_from(raw.len()).unwrap_or(i64::MAX);
        let now = now_rfc3339();

        let new_doc = NewDoc {
            doc_id: doc_id.as_str(),
            raw_sha: raw_sha.as_str(),
            filename: &filename,
            mime: &mime,
            byte_len,
            latest_ver: 1,
            created_at: &now,
            updated_at: &now,
        };
        let doc_id_str = doc_id.as_str();
        let raw_sha_str = raw_sha.as_str();
        let config_sha_str = parser_config_sha.as_str();
        let now_str = now.as_str();

        let version = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    // The upsert is the transaction's first statement so the
                    // row is write-locked before the version is read back.
                    diesel::insert_into(doc::table)
                        .values(&new_doc)
                        .on_conflict(doc::doc_id)
                        .do_update()
                        .set((
                            doc::latest_ver.eq(doc::latest_ver + 1),
                            doc::updated_at.eq(now_str),
                        ))
                        .execute(conn)
                        .await?;

                    let version: i64 = doc::table
                        .find(doc_id_str)
                        .select(doc::latest_ver)
                        .first(conn)
                        .await?;

                    diesel::insert_into(doc_version::table)
                        .values(&NewDocVersion {
                            doc_id: doc_id_str,
                            ver: version,
                            raw_sha: raw_sha_str,
                            parser_config_sha: config_sha_str,
                            created_at: now_str,
                        })
                        .execute(conn)
                        .await?;

                    Ok::<_, DieselError>(version)
                })
            })
            .await
        })?;

        debug!("Reserved {} v{}", doc_id, version);
        Ok(Reservation {
            doc_id,
            version,
            raw_sha,
            filename,
            mime,
            parser_config_sha,
        })
    }

    pub async fn get_document(&self, doc_id: &DocId) -> Result<Option<DocRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            doc::table
                .find(doc_id.as_str())
                .select(DocRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }

    /// All versions of a document, oldest first.
    pub async fn list_versions(
        &self,
        doc_id: &DocId,
    ) -> Result<Vec<DocVersionRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            doc_version::table
                .filter(doc_version::doc_id.eq(doc_id.as_str()))
                .order(doc_version::ver.asc())
                .select(DocVersionRecord::as_select())
                .load(&mut conn)
                .await
        })
    }

    pub async fn get_version(
        &self,
        doc_id: &DocId,
        version: i64,
    ) -> Result<Option<DocVersionRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            doc_version::table
                .find((doc_id.as_str(), version))
                .select(DocVersionRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n..."), "application/pdf");
        assert_eq!(sniff_mime(b"just words"), DEFAULT_MIME);
    }

    #[test]
    fn test_default_parser_config_sha_is_stable() {
        assert_eq!(default_parser_config_sha(), default_parser_config_sha());
        assert_eq!(default_parser_config_sha().as_str().len(), 64);
    }
}
