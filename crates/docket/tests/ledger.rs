//! Reservation, block ledger, and bookkeeping tables against SQLite.

use docket::artifacts::{Artifact, ArtifactType, Provenance};
use docket::blocks::{normalize_parser_blocks, BlockType, LedgerBlock};
use docket::repository::blocks::BlockLedgerError;
use docket::repository::models::{NewOcrJob, NewOcrPage, NewOcrPatch, NewPageDiff};
use docket::repository::ocr::{ocr_job_id, OcrPageStatus};
use docket::repository::ReserveOptions;
use docket::{DbContext, PageNo, RunId, Sha256Hex};
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> (TempDir, DbContext) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::from_sqlite_path(&dir.path().join("docket.db")).unwrap();
    let applied = ctx.migrate().await.unwrap();
    assert!(!applied.is_empty());
    (dir, ctx)
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_dir, ctx) = setup().await;
    assert!(ctx.migrate().await.unwrap().is_empty());
}

#[tokio::test]
async fn identical_content_gets_increasing_versions() {
    let (_dir, ctx) = setup().await;
    let docs = ctx.documents();

    let first = docs
        .reserve(b"hello world", &ReserveOptions::default())
        .await
        .unwrap();
    let second = docs
        .reserve(b"hello world", &ReserveOptions::default())
        .await
        .unwrap();
    let other = docs
        .reserve(b"something else", &ReserveOptions::default())
        .await
        .unwrap();

    assert_eq!(first.doc_id, second.doc_id);
    assert_eq!((first.version, second.version), (1, 2));
    assert_ne!(first.doc_id, other.doc_id);
    assert_eq!(other.version, 1);
    assert_eq!(first.filename, "inline.txt");
    assert_eq!(first.mime, "text/plain");

    let record = docs.get_document(&first.doc_id).await.unwrap().unwrap();
    assert_eq!(record.latest_ver, 2);
    assert_eq!(record.byte_len, 11);
    let versions = docs.list_versions(&first.doc_id).await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.ver).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test]
async fn concurrent_reservations_never_collide() {
    let (_dir, ctx) = setup().await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let docs = ctx.documents();
            tokio::spawn(async move {
                docs.reserve(b"same bytes", &ReserveOptions::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().version);
    }
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);
}

fn structure() -> serde_json::Value {
    json!({"blocks": [
        {"type": "text", "page": 1, "text": "Quarterly   REPORT"},
        {"type": "figure", "page": 1, "text": null},
        {"type": "table", "page": 2, "text": "a | b"},
        {"type": "text", "page": 2, "text": "Totals"},
    ]})
}

#[tokio::test]
async fn block_upsert_is_idempotent_and_ordered() {
    let (_dir, ctx) = setup().await;
    let reservation = ctx
        .documents()
        .reserve(b"report", &ReserveOptions::default())
        .await
        .unwrap();
    let blocks = normalize_parser_blocks(&reservation.doc_id, 1, &structure()).unwrap();
    let repo = ctx.blocks();
    let prov = json!({"step": "normalize"});

    let first = repo
        .upsert_blocks(&reservation.doc_id, 1, &blocks, &prov)
        .await
        .unwrap();
    assert_eq!(first.inserted, 4);
    let again = repo
        .upsert_blocks(&reservation.doc_id, 1, &blocks, &prov)
        .await
        .unwrap();
    assert_eq!((again.inserted, again.unchanged), (0, 4));

    let stored = repo.list_blocks(&reservation.doc_id, 1).await.unwrap();
    assert_eq!(stored.len(), 4);
    assert!(stored
        .windows(2)
        .all(|w| (w[0].page, &w[0].block_id) <= (w[1].page, &w[1].block_id)));
    let mut expected = blocks.clone();
    expected.sort_by(|a, b| (a.page, &a.block_id).cmp(&(b.page, &b.block_id)));
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn conflicting_block_rolls_back_batch() {
    let (_dir, ctx) = setup().await;
    let reservation = ctx
        .documents()
        .reserve(b"report", &ReserveOptions::default())
        .await
        .unwrap();
    let doc = reservation.doc_id;
    let blocks = normalize_parser_blocks(&doc, 1, &structure()).unwrap();
    let repo = ctx.blocks();
    repo.upsert_blocks(&doc, 1, &blocks[..1], &json!({}))
        .await
        .unwrap();

    let tampered = LedgerBlock {
        block_sha: Sha256Hex::digest(b"different").to_string(),
        ..blocks[0].clone()
    };
    let batch = vec![blocks[1].clone(), tampered];
    let err = repo
        .upsert_blocks(&doc, 1, &batch, &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, BlockLedgerError::Conflict { .. }));
    assert!(err.to_string().starts_with("block_conflict_mismatch"));
    assert_eq!(repo.count_blocks(&doc, 1).await.unwrap(), 1);
}

#[tokio::test]
async fn replace_page_blocks_keeps_figures_and_reindexes() {
    let (_dir, ctx) = setup().await;
    let reservation = ctx
        .documents()
        .reserve(b"report", &ReserveOptions::default())
        .await
        .unwrap();
    let doc = reservation.doc_id;
    let repo = ctx.blocks();
    let blocks = normalize_parser_blocks(&doc, 1, &structure()).unwrap();
    repo.upsert_blocks(&doc, 1, &blocks, &json!({}))
        .await
        .unwrap();

    let page_one = PageNo::new(1).unwrap();
    let ocr = normalize_parser_blocks(
        &doc,
        1,
        &json!({"blocks": [{"type": "text", "page": 1, "text": "OCR  Text"}]}),
    )
    .unwrap();
    let summary = repo
        .replace_page_blocks(&doc, 1, &[page_one], &ocr, &json!({"source": "ocr"}))
        .await
        .unwrap();
    assert_eq!((summary.deleted, summary.inserted), (1, 1));

    let stored = repo.list_blocks(&doc, 1).await.unwrap();
    let page_one_types: Vec<BlockType> = stored
        .iter()
        .filter(|b| b.page == page_one)
        .map(|b| b.block_type)
        .collect();
    assert_eq!(page_one_types.len(), 2);
    assert!(page_one_types.contains(&BlockType::Figure));
    assert_eq!(stored.len(), 4);

    assert_eq!(repo.reindex_pages(&doc, 1, &[page_one]).await.unwrap(), 2);
    let index = repo.search_index(&doc, 1).await.unwrap();
    assert_eq!(
        index.get(&ocr[0].block_id).cloned().flatten().as_deref(),
        Some("ocr text")
    );
    assert_eq!(repo.reindex_all(&doc, 1).await.unwrap(), 4);
}

#[tokio::test]
async fn artifacts_are_insert_or_ignore_per_type() {
    let (_dir, ctx) = setup().await;
    let run = RunId::parse("run-art").unwrap();
    let repo = ctx.artifacts();
    let sha = Sha256Hex::digest(b"memo");
    let artifact = Artifact::new(
        ArtifactType::Memo,
        "text/markdown",
        "file:///objects/run/run-art/memo.md",
        sha.clone(),
        Provenance::new(run.clone(), ArtifactType::Memo, "memo", sha.clone(), sha),
    );

    assert_eq!(repo.count_by_run(run.as_str()).await.unwrap(), 0);
    assert!(repo.insert(&artifact).await.unwrap());
    assert!(!repo.insert(&artifact).await.unwrap());
    assert_eq!(repo.count_by_run(run.as_str()).await.unwrap(), 1);

    let listed = repo.list_by_run(run.as_str()).await.unwrap();
    assert_eq!(listed[0].artifact_id, "run-art:memo");
    let prov: Provenance = serde_json::from_str(&listed[0].prov).unwrap();
    assert_eq!(prov, artifact.prov);
}

#[tokio::test]
async fn ocr_rows_converge_on_retry() {
    let (_dir, ctx) = setup().await;
    let reservation = ctx
        .documents()
        .reserve(b"%PDF-1.4 scan", &ReserveOptions::default())
        .await
        .unwrap();
    assert_eq!(reservation.mime, "application/pdf");
    let doc = reservation.doc_id.as_str();
    let repo = ctx.ocr();
    let job_id = ocr_job_id("run-ocr");
    let gate_rev = Sha256Hex::digest(b"gate").to_string();
    let job = NewOcrJob {
        job_id: &job_id,
        doc_id: doc,
        ver: 1,
        gate_rev: &gate_rev,
        policy: "{}",
        created_at: "2026-01-01T00:00:00Z",
    };
    assert!(repo.insert_job(&job).await.unwrap());
    assert!(!repo.insert_job(&job).await.unwrap());

    let png_sha = Sha256Hex::digest(b"png").to_string();
    let mut page = NewOcrPage {
        job_id: &job_id,
        page_idx: 0,
        status: OcrPageStatus::Gated.as_str(),
        gate_score: Some(1.0),
        gate_reasons: "[\"no_blocks\"]",
        png_uri: None,
        png_sha: None,
        raw_uri: None,
        raw_sha: None,
        updated_at: "2026-01-01T00:00:00Z",
    };
    repo.upsert_page(&page).await.unwrap();
    page.status = OcrPageStatus::Rendered.as_str();
    page.png_sha = Some(&png_sha);
    repo.upsert_page(&page).await.unwrap();
    let pages = repo.list_pages(&job_id).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].status, "rendered");
    assert_eq!(pages[0].png_sha.as_deref(), Some(png_sha.as_str()));

    let patch_sha = Sha256Hex::digest(b"patch").to_string();
    let patch = NewOcrPatch {
        doc_id: doc,
        ver: 1,
        page_idx: 0,
        patch_sha: &patch_sha,
        patch: "{}",
        source_job_id: Some(&job_id),
        created_at: "2026-01-01T00:00:00Z",
    };
    assert!(repo.insert_patch(&patch).await.unwrap());
    assert!(!repo.insert_patch(&patch).await.unwrap());

    let before = Sha256Hex::digest(b"before").to_string();
    let after = Sha256Hex::digest(b"after").to_string();
    let diff_sha = Sha256Hex::digest(b"diff").to_string();
    let diff = NewPageDiff {
        doc_id: doc,
        ver: 1,
        page_idx: 0,
        before_sha: &before,
        after_sha: &after,
        changed_blocks: 2,
        page_diff_sha: &diff_sha,
        created_at: "2026-01-01T00:00:00Z",
    };
    assert!(repo.insert_page_diff(&diff).await.unwrap());
    assert!(!repo.insert_page_diff(&diff).await.unwrap());
    assert_eq!(repo.list_page_diffs(doc, 1).await.unwrap().len(), 1);
    assert_eq!(repo.list_patches(doc, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn hash_columns_reject_malformed_digests() {
    let (_dir, ctx) = setup().await;
    let reservation = ctx
        .documents()
        .reserve(b"x", &ReserveOptions::default())
        .await
        .unwrap();
    let job_id = ocr_job_id("run-bad");
    let job = NewOcrJob {
        job_id: &job_id,
        doc_id: reservation.doc_id.as_str(),
        ver: 1,
        gate_rev: "NOT-A-HASH",
        policy: "{}",
        created_at: "2026-01-01T00:00:00Z",
    };
    assert!(ctx.ocr().insert_job(&job).await.is_err());
}

#[tokio::test]
async fn workflow_journal_keeps_first_completion() {
    let (_dir, ctx) = setup().await;
    let repo = ctx.workflow();

    assert_eq!(repo.completed_output("run-w", "parse").await.unwrap(), None);
    repo.append_event("run-w", "parse", "started", "{}")
        .await
        .unwrap();
    repo.complete_step("run-w", "parse", "{\"ok\":1}")
        .await
        .unwrap();
    repo.complete_step("run-w", "parse", "{\"ok\":2}")
        .await
        .unwrap();
    repo.append_event("run-w", "parse", "completed", "{}")
        .await
        .unwrap();

    assert_eq!(
        repo.completed_output("run-w", "parse")
            .await
            .unwrap()
            .as_deref(),
        Some("{\"ok\":1}")
    );
    let phases: Vec<String> = repo
        .list_events("run-w")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.phase)
        .collect();
    assert_eq!(phases, vec!["started", "completed"]);
}
