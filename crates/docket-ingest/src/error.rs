use std::time::Duration;

use docket::blocks::NormalizeError;
use docket::effects::EffectKeyError;
use docket::repository::BlockLedgerError;
use docket::storage::ObjectStoreError;
use docket::{DieselError, EffectError};
use docket_ocr::OcrError;
use thiserror::Error;

use crate::parser::ParserError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),
    #[error(transparent)]
    Effect(#[from] EffectError),
    #[error(transparent)]
    EffectKey(#[from] EffectKeyError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Ledger(#[from] BlockLedgerError),
    #[error("cannot normalize parser output: {0}")]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error("ocr lane exceeded its budget of {0:?}")]
    OcrTimeout(Duration),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact {artifact_id} {field} mismatch: recorded {recorded}, found {actual}")]
    ArtifactMismatch {
        artifact_id: String,
        field: &'static str,
        recorded: String,
        actual: String,
    },
    #[error("run {0} already has recorded output; resume it with a journaled host or pick a new run id")]
    RunExists(String),
    #[error("FAILED_NO_ARTIFACT: run {0} persisted no artifacts")]
    NoArtifact(String),
}

impl PipelineError {
    /// Whether the host should schedule another attempt of the failed step.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Effect(e) => {
                e.is_retryable() || matches!(e, EffectError::Failed(inner) if is_transient(inner))
            }
            PipelineError::Ocr(e) => e.is_transient(),
            PipelineError::OcrTimeout(_) => true,
            _ => false,
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OcrError>()
        .map(OcrError::is_transient)
        .unwrap_or(false)
}
