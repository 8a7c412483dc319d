//! OCR job, page, patch, and diff rows.
//!
//! Everything here is keyed by content hashes and written insert-or-ignore
//! (pages are upserted as their status advances), so a retried OCR lane
//! converges on the same rows.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{
    NewDocirPageVersion, NewOcrJob, NewOcrPage, NewOcrPatch, NewPageDiff, OcrJobRecord,
    OcrPageRecord, OcrPatchRecord, PageDiffRecord,
};
use super::pool::{DbPool, DieselError};
use crate::schema::{docir_page_version, ocr_job, ocr_page, ocr_patch, page_diff};
use crate::with_conn;

/// Lifecycle of one page in an OCR job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrPageStatus {
    Gated,
    Rendered,
    OcrReady,
    Skipped,
}

impl OcrPageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrPageStatus::Gated => "gated",
            OcrPageStatus::Rendered => "rendered",
            OcrPageStatus::OcrReady => "ocr_ready",
            OcrPageStatus::Skipped => "skipped",
        }
    }
}

/// `"{run}:ocr"`: one OCR job per run.
pub fn ocr_job_id(run_id: &str) -> String {
    format!("{}:ocr", run_id)
}

#[derive(Clone)]
pub struct OcrRepository {
    pool: DbPool,
}

impl OcrRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns true when the job row was created by this call.
    pub async fn insert_job(&self, job: &NewOcrJob<'_>) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::insert_into(ocr_job::table)
                .values(job)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<OcrJobRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            ocr_job::table
                .find(job_id)
                .select(OcrJobRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })
    }

    /// Insert the page row or overwrite it with the latest status.
    pub async fn upsert_page(&self, page: &NewOcrPage<'_>) -> Result<(), DieselError> {
        with_conn!(self.pool, conn, {
            diesel::insert_into(ocr_page::table)
                .values(page)
                .on_conflict((ocr_page::job_id, ocr_page::page_idx))
                .do_update()
                .set(page)
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn list_pages(&self, job_id: &str) -> Result<Vec<OcrPageRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            ocr_page::table
                .filter(ocr_page::job_id.eq(job_id))
                .order(ocr_page::page_idx.asc())
                .select(OcrPageRecord::as_select())
                .load(&mut conn)
                .await
        })
    }

    pub async fn insert_patch(&self, patch: &NewOcrPatch<'_>) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::insert_into(ocr_patch::table)
                .values(patch)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    pub async fn list_patches(
        &self,
        doc_id: &str,
        version: i64,
    ) -> Result<Vec<OcrPatchRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            ocr_patch::table
                .filter(ocr_patch::doc_id.eq(doc_id))
                .filter(ocr_patch::ver.eq(version))
                .order((ocr_patch::page_idx.asc(), ocr_patch::patch_sha.asc()))
                .select(OcrPatchRecord::as_select())
                .load(&mut conn)
                .await
        })
    }

    pub async fn insert_page_diff(&self, diff: &NewPageDiff<'_>) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::insert_into(page_diff::table)
                .values(diff)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    pub async fn list_page_diffs(
        &self,
        doc_id: &str,
        version: i64,
    ) -> Result<Vec<PageDiffRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            page_diff::table
                .filter(page_diff::doc_id.eq(doc_id))
                .filter(page_diff::ver.eq(version))
                .order((page_diff::page_idx.asc(), page_diff::page_diff_sha.asc()))
                .select(PageDiffRecord::as_select())
                .load(&mut conn)
                .await
        })
    }

    /// Record the after-state hash of a merged page.
    pub async fn insert_page_version(
        &self,
        version: &NewDocirPageVersion<'_>,
    ) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            let rows = diesel::insert_into(docir_page_version::table)
                .values(version)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    pub async fn count_page_versions(
        &self,
        doc_id: &str,
        version: i64,
    ) -> Result<i64, DieselError> {
        use diesel::dsl::count_star;
        with_conn!(self.pool, conn, {
            docir_page_version::table
                .filter(docir_page_version::doc_id.eq(doc_id))
                .filter(docir_page_version::ver.eq(version))
                .select(count_star())
                .first(&mut conn)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_and_status_names() {
        assert_eq!(ocr_job_id("run-1"), "run-1:ocr");
        assert_eq!(OcrPageStatus::OcrReady.as_str(), "ocr_ready");
        assert_eq!(OcrPageStatus::Gated.as_str(), "gated");
    }
}
