//! Step hosts: who runs a pipeline step and remembers that it ran.

use std::future::Future;

use async_trait::async_trait;
use docket::repository::WorkflowRepository;
use docket::RunId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

#[async_trait]
pub trait StepHost: Send + Sync {
    /// Run the step `name` of `run` and return its output.
    async fn run_step<T, F, Fut>(
        &self,
        run: &RunId,
        name: &str,
        step: F,
    ) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, PipelineError>> + Send;

    /// True when a second run with the same id picks up the first one's
    /// recorded steps instead of starting over.
    fn resumes(&self) -> bool {
        false
    }
}

/// Runs every step directly with no bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineHost;

#[async_trait]
impl StepHost for InlineHost {
    async fn run_step<T, F, Fut>(
        &self,
        run: &RunId,
        name: &str,
        step: F,
    ) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, PipelineError>> + Send,
    {
        debug!("Running step {} of run {}", name, run);
        step().await
    }
}

/// Checkpoints step outputs in the workflow journal.
///
/// A step that already completed for the run returns its recorded output
/// without running again, so a resumed run picks up after the last
/// completed step.
#[derive(Clone)]
pub struct JournalHost {
    workflow: WorkflowRepository,
}

impl JournalHost {
    pub fn new(workflow: WorkflowRepository) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl StepHost for JournalHost {
    async fn run_step<T, F, Fut>(
        &self,
        run: &RunId,
        name: &str,
        step: F,
    ) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, PipelineError>> + Send,
    {
        let run = run.as_str();

        if let Some(recorded) = self.workflow.completed_output(run, name).await? {
            debug!("Step {} already completed for run {}", name, run);
            self.workflow.append_event(run, name, "replayed", "{}").await?;
            return Ok(serde_json::from_str(&recorded)?);
        }

        self.workflow.append_event(run, name, "started", "{}").await?;
        match step().await {
            Ok(output) => {
                let json = serde_json::to_string(&output)?;
                self.workflow.complete_step(run, name, &json).await?;
                self.workflow.append_event(run, name, "completed", "{}").await?;
                info!("Step {} completed", name);
                Ok(output)
            }
            Err(e) => {
                warn!("Step {} failed: {}", name, e);
                let payload = json!({
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                })
                .to_string();
                self.workflow.append_event(run, name, "failed", &payload).await?;
                Err(e)
            }
        }
    }

    fn resumes(&self) -> bool {
        true
    }
}
