//! Block ledger persistence.
//!
//! Rows are keyed by `(doc_id, ver, block_id)` and a block id is derived from
//! its content hash, so re-writing the same block only refreshes provenance.
//! A different hash under an existing id is a conflict and is never silently
//! overwritten.

use std::collections::BTreeMap;

use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::json_error;
use super::models::{BlockRecord, NewBlock};
use super::pool::{DbPool, DieselError};
use crate::blocks::{search_text, BlockType, LedgerBlock, NormalizeError};
use crate::ids::{DocId, PageNo};
use crate::schema::block;
use crate::with_conn;

#[derive(Debug, Error)]
pub enum BlockLedgerError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),
    #[error(
        "block_conflict_mismatch: {block_id} is stored with sha {existing}, refusing {incoming}"
    )]
    Conflict {
        block_id: String,
        existing: String,
        incoming: String,
    },
}

/// Counts from one ledger write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockWriteSummary {
    pub deleted: usize,
    pub inserted: usize,
    pub unchanged: usize,
}

impl TryFrom<BlockRecord> for LedgerBlock {
    type Error = DieselError;

    fn try_from(record: BlockRecord) -> Result<Self, Self::Error> {
        let block_type: BlockType = record
            .block_type
            .parse()
            .map_err(|e: NormalizeError| DieselError::DeserializationError(Box::new(e)))?;
        let bbox = record
            .bbox
            .as_deref()
            .map(serde_json::from_str::<[f64; 4]>)
            .transpose()
            .map_err(json_error)?;
        Ok(LedgerBlock {
            block_id: record.block_id,
            block_type,
            page: PageNo::clamped(record.page),
            bbox,
            text: record.text,
            data: serde_json::from_str(&record.data).map_err(json_error)?,
            block_sha: record.block_sha,
        })
    }
}

/// Serialized columns of one block.
struct BlockRow {
    block_id: String,
    block_type: &'static str,
    page: i64,
    bbox: Option<String>,
    text: Option<String>,
    data: String,
    block_sha: String,
}

impl BlockRow {
    fn from_block(block: &LedgerBlock) -> Self {
        Self {
            block_id: block.block_id.clone(),
            block_type: block.block_type.as_str(),
            page: i64::from(block.page.get()),
            bbox: block
                .bbox
                .map(|b| Value::from(b.to_vec()).to_string()),
            text: block.text.clone(),
            data: block.data.to_string(),
            block_sha: block.block_sha.clone(),
        }
    }

    fn as_new<'a>(&'a self, doc_id: &'a str, ver: i64, prov: &'a str) -> NewBlock<'a> {
        NewBlock {
            doc_id,
            ver,
            block_id: &self.block_id,
            block_type: self.block_type,
            page: self.page,
            bbox: self.bbox.as_deref(),
            text: self.text.as_deref(),
            data: &self.data,
            block_sha: &self.block_sha,
            prov,
        }
    }
}

/// Write rows inside an open transaction. Each row is inserted first so the
/// transaction's first statement is a write; an existing row must carry the
/// same hash and only gets its provenance refreshed.
macro_rules! write_rows {
    ($conn:ident, $doc_id:expr, $ver:expr, $rows:expr, $prov:expr, $summary:ident) => {
        for row in $rows {
            let written = diesel::insert_into(block::table)
                .values(&row.as_new($doc_id, $ver, $prov))
                .on_conflict_do_nothing()
                .execute($conn)
                .await?;
            if written > 0 {
                $summary.inserted += 1;
                continue;
            }

            let existing: String = block::table
                .find(($doc_id, $ver, row.block_id.as_str()))
                .select(block::block_sha)
                .first($conn)
                .await?;
            if existing != row.block_sha {
                return Err(BlockLedgerError::Conflict {
                    block_id: row.block_id.clone(),
                    existing,
                    incoming: row.block_sha.clone(),
                });
            }
            diesel::update(block::table.find(($doc_id, $ver, row.block_id.as_str())))
                .set(block::prov.eq($prov))
                .execute($conn)
                .await?;
            $summary.unchanged += 1;
        }
    };
}

#[derive(Clone)]
pub struct BlockRepository {
    pool: DbPool,
}

impl BlockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Write blocks for one document version as a single batch.
    ///
    /// Any conflicting row rolls the whole batch back.
    pub async fn upsert_blocks(
        &self,
        doc_id: &DocId,
        version: i64,
        blocks: &[LedgerBlock],
        prov: &Value,
    ) -> Result<BlockWriteSummary, BlockLedgerError> {
        let rows: Vec<BlockRow> = blocks.iter().map(BlockRow::from_block).collect();
        let prov = prov.to_string();
        let doc_id = doc_id.as_str();
        let rows_ref = &rows;
        let prov_ref = prov.as_str();

        let summary = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut summary = BlockWriteSummary::default();
                    write_rows!(conn, doc_id, version, rows_ref, prov_ref, summary);
                    Ok::<_, BlockLedgerError>(summary)
                })
            })
            .await
        })?;

        debug!(
            "Ledger {} v{}: {} inserted, {} unchanged",
            doc_id, version, summary.inserted, summary.unchanged
        );
        Ok(summary)
    }

    /// Blocks of one version ordered by (page, block_id).
    pub async fn list_blocks(
        &self,
        doc_id: &DocId,
        version: i64,
    ) -> Result<Vec<LedgerBlock>, DieselError> {
        let records: Vec<BlockRecord> = with_conn!(self.pool, conn, {
            block::table
                .filter(block::doc_id.eq(doc_id.as_str()))
                .filter(block::ver.eq(version))
                .order((block::page.asc(), block::block_id.asc()))
                .select(BlockRecord::as_select())
                .load(&mut conn)
                .await
        })?;
        records.into_iter().map(LedgerBlock::try_from).collect()
    }

    pub async fn count_blocks(&self, doc_id: &DocId, version: i64) -> Result<i64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            block::table
                .filter(block::doc_id.eq(doc_id.as_str()))
                .filter(block::ver.eq(version))
                .select(count_star())
                .first(&mut conn)
                .await
        })
    }

    /// Swap the text/table blocks of `pages` for `replacements` in one transaction.
    ///
    /// Figure and code blocks on those pages are left in place.
    pub async fn replace_page_blocks(
        &self,
        doc_id: &DocId,
        version: i64,
        pages: &[PageNo],
        replacements: &[LedgerBlock],
        prov: &Value,
    ) -> Result<BlockWriteSummary, BlockLedgerError> {
        let rows: Vec<BlockRow> = replacements.iter().map(BlockRow::from_block).collect();
        let page_numbers: Vec<i64> = pages.iter().map(|p| i64::from(p.get())).collect();
        let replaced_types = [BlockType::Text.as_str(), BlockType::Table.as_str()];
        let prov = prov.to_string();
        let doc_id = doc_id.as_str();
        let rows_ref = &rows;
        let pages_ref = &page_numbers;
        let prov_ref = prov.as_str();

        let summary = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut summary = BlockWriteSummary::default();
                    summary.deleted = diesel::delete(
                        block::table
                            .filter(block::doc_id.eq(doc_id))
                            .filter(block::ver.eq(version))
                            .filter(block::page.eq_any(pages_ref))
                            .filter(block::block_type.eq_any(replaced_types)),
                    )
                    .execute(conn)
                    .await?;
                    write_rows!(conn, doc_id, version, rows_ref, prov_ref, summary);
                    Ok::<_, BlockLedgerError>(summary)
                })
            })
            .await
        })?;

        debug!(
            "Replaced {} blocks on {} pages of {} v{} with {} new",
            summary.deleted,
            pages.len(),
            doc_id,
            version,
            summary.inserted
        );
        Ok(summary)
    }

    /// Refresh `search_text` for the blocks on `pages`. Returns rows updated.
    pub async fn reindex_pages(
        &self,
        doc_id: &DocId,
        version: i64,
        pages: &[PageNo],
    ) -> Result<usize, DieselError> {
        let page_numbers: Vec<i64> = pages.iter().map(|p| i64::from(p.get())).collect();
        let doc_id = doc_id.as_str();
        let texts: Vec<(String, Option<String>)> = with_conn!(self.pool, conn, {
            block::table
                .filter(block::doc_id.eq(doc_id))
                .filter(block::ver.eq(version))
                .filter(block::page.eq_any(&page_numbers))
                .select((block::block_id, block::text))
                .load(&mut conn)
                .await
        })?;
        self.write_search_text(doc_id, version, texts).await
    }

    /// Refresh `search_text` for every block of a version.
    pub async fn reindex_all(&self, doc_id: &DocId, version: i64) -> Result<usize, DieselError> {
        let doc_id = doc_id.as_str();
        let texts: Vec<(String, Option<String>)> = with_conn!(self.pool, conn, {
            block::table
                .filter(block::doc_id.eq(doc_id))
                .filter(block::ver.eq(version))
                .select((block::block_id, block::text))
                .load(&mut conn)
                .await
        })?;
        self.write_search_text(doc_id, version, texts).await
    }

    /// Search text keyed by block id, for inspection.
    pub async fn search_index(
        &self,
        doc_id: &DocId,
        version: i64,
    ) -> Result<BTreeMap<String, Option<String>>, DieselError> {
        let rows: Vec<(String, Option<String>)> = with_conn!(self.pool, conn, {
            block::table
                .filter(block::doc_id.eq(doc_id.as_str()))
                .filter(block::ver.eq(version))
                .select((block::block_id, block::search_text))
                .load(&mut conn)
                .await
        })?;
        Ok(rows.into_iter().collect())
    }

    async fn write_search_text(
        &self,
        doc_id: &str,
        version: i64,
        texts: Vec<(String, Option<String>)>,
    ) -> Result<usize, DieselError> {
        let updates: Vec<(String, String)> = texts
            .into_iter()
            .map(|(block_id, text)| {
                let normalized = search_text(text.as_deref());
                (block_id, normalized)
            })
            .collect();
        let updates_ref = &updates;

        let updated = with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                Box::pin(async move {
                    let mut updated = 0;
                    for (block_id, normalized) in updates_ref {
                        updated += diesel::update(
                            block::table.find((doc_id, version, block_id.as_str())),
                        )
                        .set(block::search_text.eq(normalized))
                        .execute(conn)
                        .await?;
                    }
                    Ok::<_, DieselError>(updated)
                })
            })
            .await
        })?;

        debug!("Reindexed {} blocks of {} v{}", updated, doc_id, version);
        Ok(updated)
    }
}
