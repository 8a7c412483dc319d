use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0004_artifacts_and_runs")
        .depends_on(&["0003_ocr"])
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE artifact (
    artifact_id TEXT PRIMARY KEY NOT NULL,
    run_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    format TEXT NOT NULL,
    uri TEXT NOT NULL,
    sha256 TEXT NOT NULL CHECK (length(sha256) = 64 AND sha256 NOT GLOB '*[^0-9a-f]*'),
    prov TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_artifact_run ON artifact(run_id);
CREATE TABLE workflow_step (
    run_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    output_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, step_name)
);
CREATE TABLE workflow_event (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    phase TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_workflow_event_run ON workflow_event(run_id, event_id)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE artifact (
    artifact_id TEXT PRIMARY KEY NOT NULL,
    run_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    format TEXT NOT NULL,
    uri TEXT NOT NULL,
    sha256 TEXT NOT NULL CHECK (sha256 ~ '^[a-f0-9]{64}$'),
    prov TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_artifact_run ON artifact(run_id);
CREATE TABLE workflow_step (
    run_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    output_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (run_id, step_name)
);
CREATE TABLE workflow_event (
    event_id BIGSERIAL PRIMARY KEY,
    run_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    phase TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_workflow_event_run ON workflow_event(run_id, event_id)"#,
                ),
        )
}
