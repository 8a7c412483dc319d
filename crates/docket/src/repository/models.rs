//! Diesel models for the ingestion tables.
//!
//! Record types are loaded with `as_select()`; `New*` types borrow their
//! fields for insertion.

use diesel::prelude::*;

use crate::schema;

/// Document row: one per distinct raw content hash.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::doc)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocRecord {
    pub doc_id: String,
    pub raw_sha: String,
    pub filename: String,
    pub mime: String,
    pub byte_len: i64,
    pub latest_ver: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::doc)]
pub struct NewDoc<'a> {
    pub doc_id: &'a str,
    pub raw_sha: &'a str,
    pub filename: &'a str,
    pub mime: &'a str,
    pub byte_len: i64,
    pub latest_ver: i64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// One ingestion event of a document.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::doc_version)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocVersionRecord {
    pub doc_id: String,
    pub ver: i64,
    pub raw_sha: String,
    pub parser_config_sha: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::doc_version)]
pub struct NewDocVersion<'a> {
    pub doc_id: &'a str,
    pub ver: i64,
    pub raw_sha: &'a str,
    pub parser_config_sha: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::block)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BlockRecord {
    pub doc_id: String,
    pub ver: i64,
    pub block_id: String,
    pub block_type: String,
    pub page: i64,
    pub bbox: Option<String>,
    pub text: Option<String>,
    pub data: String,
    pub block_sha: String,
    pub prov: String,
    pub search_text: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::block)]
pub struct NewBlock<'a> {
    pub doc_id: &'a str,
    pub ver: i64,
    pub block_id: &'a str,
    pub block_type: &'a str,
    pub page: i64,
    pub bbox: Option<&'a str>,
    pub text: Option<&'a str>,
    pub data: &'a str,
    pub block_sha: &'a str,
    pub prov: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::side_effect)]
pub struct NewSideEffect<'a> {
    pub effect_key: &'a str,
    pub response_json: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::artifact)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub run_id: String,
    pub artifact_type: String,
    pub format: String,
    pub uri: String,
    pub sha256: String,
    pub prov: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::artifact)]
pub struct NewArtifact<'a> {
    pub artifact_id: &'a str,
    pub run_id: &'a str,
    pub artifact_type: &'a str,
    pub format: &'a str,
    pub uri: &'a str,
    pub sha256: &'a str,
    pub prov: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::ocr_job)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OcrJobRecord {
    pub job_id: String,
    pub doc_id: String,
    pub ver: i64,
    pub gate_rev: String,
    pub policy: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ocr_job)]
pub struct NewOcrJob<'a> {
    pub job_id: &'a str,
    pub doc_id: &'a str,
    pub ver: i64,
    pub gate_rev: &'a str,
    pub policy: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::ocr_page)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OcrPageRecord {
    pub job_id: String,
    pub page_idx: i64,
    pub status: String,
    pub gate_score: Option<f64>,
    pub gate_reasons: String,
    pub png_uri: Option<String>,
    pub png_sha: Option<String>,
    pub raw_uri: Option<String>,
    pub raw_sha: Option<String>,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::ocr_page)]
#[diesel(treat_none_as_null = true)]
pub struct NewOcrPage<'a> {
    pub job_id: &'a str,
    pub page_idx: i64,
    pub status: &'a str,
    pub gate_score: Option<f64>,
    pub gate_reasons: &'a str,
    pub png_uri: Option<&'a str>,
    pub png_sha: Option<&'a str>,
    pub raw_uri: Option<&'a str>,
    pub raw_sha: Option<&'a str>,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::ocr_patch)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OcrPatchRecord {
    pub doc_id: String,
    pub ver: i64,
    pub page_idx: i64,
    pub patch_sha: String,
    pub patch: String,
    pub source_job_id: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ocr_patch)]
pub struct NewOcrPatch<'a> {
    pub doc_id: &'a str,
    pub ver: i64,
    pub page_idx: i64,
    pub patch_sha: &'a str,
    pub patch: &'a str,
    pub source_job_id: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::page_diff)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageDiffRecord {
    pub doc_id: String,
    pub ver: i64,
    pub page_idx: i64,
    pub before_sha: String,
    pub after_sha: String,
    pub changed_blocks: i64,
    pub page_diff_sha: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::page_diff)]
pub struct NewPageDiff<'a> {
    pub doc_id: &'a str,
    pub ver: i64,
    pub page_idx: i64,
    pub before_sha: &'a str,
    pub after_sha: &'a str,
    pub changed_blocks: i64,
    pub page_diff_sha: &'a str,
    pub created_at: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::docir_page_version)]
pub struct NewDocirPageVersion<'a> {
    pub doc_id: &'a str,
    pub ver: i64,
    pub page_idx: i64,
    pub page_sha: &'a str,
    pub source: &'a str,
    pub source_ref_sha: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::workflow_step)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkflowStepRecord {
    pub run_id: String,
    pub step_name: String,
    pub status: String,
    pub output_json: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::workflow_step)]
pub struct NewWorkflowStep<'a> {
    pub run_id: &'a str,
    pub step_name: &'a str,
    pub status: &'a str,
    pub output_json: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::workflow_event)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkflowEventRecord {
    pub event_id: i64,
    pub run_id: String,
    pub step_name: String,
    pub phase: String,
    pub payload_json: String,
    pub created_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::workflow_event)]
pub struct NewWorkflowEvent<'a> {
    pub run_id: &'a str,
    pub step_name: &'a str,
    pub phase: &'a str,
    pub payload_json: &'a str,
    pub created_at: &'a str,
}
