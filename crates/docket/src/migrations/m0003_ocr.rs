use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_ocr")
        .depends_on(&["0002_side_effects"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE ocr_job (
    job_id TEXT PRIMARY KEY NOT NULL,
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL CHECK (ver >= 1),
    gate_rev TEXT NOT NULL CHECK (length(gate_rev) = 64 AND gate_rev NOT GLOB '*[^0-9a-f]*'),
    policy TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (doc_id, ver) REFERENCES doc_version(doc_id, ver)
);
CREATE TABLE ocr_page (
    job_id TEXT NOT NULL REFERENCES ocr_job(job_id),
    page_idx INTEGER NOT NULL CHECK (page_idx >= 0),
    status TEXT NOT NULL CHECK (status IN ('gated', 'rendered', 'ocr_ready', 'skipped')),
    gate_score REAL,
    gate_reasons TEXT NOT NULL,
    png_uri TEXT,
    png_sha TEXT CHECK (png_sha IS NULL OR (length(png_sha) = 64 AND png_sha NOT GLOB '*[^0-9a-f]*')),
    raw_uri TEXT,
    raw_sha TEXT CHECK (raw_sha IS NULL OR (length(raw_sha) = 64 AND raw_sha NOT GLOB '*[^0-9a-f]*')),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, page_idx)
);
CREATE TABLE ocr_patch (
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL,
    page_idx INTEGER NOT NULL CHECK (page_idx >= 0),
    patch_sha TEXT NOT NULL CHECK (length(patch_sha) = 64 AND patch_sha NOT GLOB '*[^0-9a-f]*'),
    patch TEXT NOT NULL,
    source_job_id TEXT REFERENCES ocr_job(job_id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, patch_sha)
);
CREATE TABLE page_diff (
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL,
    page_idx INTEGER NOT NULL CHECK (page_idx >= 0),
    before_sha TEXT NOT NULL CHECK (length(before_sha) = 64 AND before_sha NOT GLOB '*[^0-9a-f]*'),
    after_sha TEXT NOT NULL CHECK (length(after_sha) = 64 AND after_sha NOT GLOB '*[^0-9a-f]*'),
    changed_blocks INTEGER NOT NULL CHECK (changed_blocks >= 0),
    page_diff_sha TEXT NOT NULL CHECK (length(page_diff_sha) = 64 AND page_diff_sha NOT GLOB '*[^0-9a-f]*'),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, page_diff_sha)
);
CREATE TABLE docir_page_version (
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL,
    page_idx INTEGER NOT NULL CHECK (page_idx >= 0),
    page_sha TEXT NOT NULL CHECK (length(page_sha) = 64 AND page_sha NOT GLOB '*[^0-9a-f]*'),
    source TEXT NOT NULL,
    source_ref_sha TEXT CHECK (source_ref_sha IS NULL OR (length(source_ref_sha) = 64 AND source_ref_sha NOT GLOB '*[^0-9a-f]*')),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, page_sha)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE ocr_job (
    job_id TEXT PRIMARY KEY NOT NULL,
    doc_id TEXT NOT NULL,
    ver BIGINT NOT NULL CHECK (ver >= 1),
    gate_rev TEXT NOT NULL CHECK (gate_rev ~ '^[a-f0-9]{64}$'),
    policy TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (doc_id, ver) REFERENCES doc_version(doc_id, ver)
);
CREATE TABLE ocr_page (
    job_id TEXT NOT NULL REFERENCES ocr_job(job_id),
    page_idx BIGINT NOT NULL CHECK (page_idx >= 0),
    status TEXT NOT NULL CHECK (status IN ('gated', 'rendered', 'ocr_ready', 'skipped')),
    gate_score DOUBLE PRECISION,
    gate_reasons TEXT NOT NULL,
    png_uri TEXT,
    png_sha TEXT CHECK (png_sha IS NULL OR png_sha ~ '^[a-f0-9]{64}$'),
    raw_uri TEXT,
    raw_sha TEXT CHECK (raw_sha IS NULL OR raw_sha ~ '^[a-f0-9]{64}$'),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, page_idx)
);
CREATE TABLE ocr_patch (
    doc_id TEXT NOT NULL,
    ver BIGINT NOT NULL,
    page_idx BIGINT NOT NULL CHECK (page_idx >= 0),
    patch_sha TEXT NOT NULL CHECK (patch_sha ~ '^[a-f0-9]{64}$'),
    patch TEXT NOT NULL,
    source_job_id TEXT REFERENCES ocr_job(job_id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, patch_sha)
);
CREATE TABLE page_diff (
    doc_id TEXT NOT NULL,
    ver BIGINT NOT NULL,
    page_idx BIGINT NOT NULL CHECK (page_idx >= 0),
    before_sha TEXT NOT NULL CHECK (before_sha ~ '^[a-f0-9]{64}$'),
    after_sha TEXT NOT NULL CHECK (after_sha ~ '^[a-f0-9]{64}$'),
    changed_blocks BIGINT NOT NULL CHECK (changed_blocks >= 0),
    page_diff_sha TEXT NOT NULL CHECK (page_diff_sha ~ '^[a-f0-9]{64}$'),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, page_diff_sha)
);
CREATE TABLE docir_page_version (
    doc_id TEXT NOT NULL,
    ver BIGINT NOT NULL,
    page_idx BIGINT NOT NULL CHECK (page_idx >= 0),
    page_sha TEXT NOT NULL CHECK (page_sha ~ '^[a-f0-9]{64}$'),
    source TEXT NOT NULL,
    source_ref_sha TEXT CHECK (source_ref_sha IS NULL OR source_ref_sha ~ '^[a-f0-9]{64}$'),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver, page_idx, page_sha)
)"#,
                ),
        )
}
