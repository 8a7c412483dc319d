use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_documents")
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE doc (
    doc_id TEXT PRIMARY KEY NOT NULL,
    raw_sha TEXT NOT NULL UNIQUE CHECK (length(raw_sha) = 64 AND raw_sha NOT GLOB '*[^0-9a-f]*'),
    filename TEXT NOT NULL,
    mime TEXT NOT NULL,
    byte_len INTEGER NOT NULL CHECK (byte_len >= 0),
    latest_ver INTEGER NOT NULL CHECK (latest_ver >= 1),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE doc_version (
    doc_id TEXT NOT NULL REFERENCES doc(doc_id),
    ver INTEGER NOT NULL CHECK (ver >= 1),
    raw_sha TEXT NOT NULL CHECK (length(raw_sha) = 64 AND raw_sha NOT GLOB '*[^0-9a-f]*'),
    parser_config_sha TEXT NOT NULL CHECK (length(parser_config_sha) = 64 AND parser_config_sha NOT GLOB '*[^0-9a-f]*'),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver)
);
CREATE TABLE block (
    doc_id TEXT NOT NULL,
    ver INTEGER NOT NULL,
    block_id TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('text', 'table', 'figure', 'code')),
    page INTEGER NOT NULL CHECK (page >= 1),
    bbox TEXT,
    text TEXT,
    data TEXT NOT NULL,
    block_sha TEXT NOT NULL CHECK (length(block_sha) = 64 AND block_sha NOT GLOB '*[^0-9a-f]*'),
    prov TEXT NOT NULL,
    search_text TEXT,
    PRIMARY KEY (doc_id, ver, block_id),
    FOREIGN KEY (doc_id, ver) REFERENCES doc_version(doc_id, ver)
);
CREATE INDEX idx_block_doc_page ON block(doc_id, ver, page)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE doc (
    doc_id TEXT PRIMARY KEY NOT NULL,
    raw_sha TEXT NOT NULL UNIQUE CHECK (raw_sha ~ '^[a-f0-9]{64}$'),
    filename TEXT NOT NULL,
    mime TEXT NOT NULL,
    byte_len BIGINT NOT NULL CHECK (byte_len >= 0),
    latest_ver BIGINT NOT NULL CHECK (latest_ver >= 1),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE doc_version (
    doc_id TEXT NOT NULL REFERENCES doc(doc_id),
    ver BIGINT NOT NULL CHECK (ver >= 1),
    raw_sha TEXT NOT NULL CHECK (raw_sha ~ '^[a-f0-9]{64}$'),
    parser_config_sha TEXT NOT NULL CHECK (parser_config_sha ~ '^[a-f0-9]{64}$'),
    created_at TEXT NOT NULL,
    PRIMARY KEY (doc_id, ver)
);
CREATE TABLE block (
    doc_id TEXT NOT NULL,
    ver BIGINT NOT NULL,
    block_id TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('text', 'table', 'figure', 'code')),
    page BIGINT NOT NULL CHECK (page >= 1),
    bbox TEXT,
    text TEXT,
    data TEXT NOT NULL,
    block_sha TEXT NOT NULL CHECK (block_sha ~ '^[a-f0-9]{64}$'),
    prov TEXT NOT NULL,
    search_text TEXT,
    PRIMARY KEY (doc_id, ver, block_id),
    FOREIGN KEY (doc_id, ver) REFERENCES doc_version(doc_id, ver)
);
CREATE INDEX idx_block_doc_page ON block(doc_id, ver, page)"#,
                ),
        )
}
