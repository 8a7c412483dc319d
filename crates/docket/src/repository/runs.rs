//! Workflow journal: completed step checkpoints and an append-only event log.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewWorkflowEvent, NewWorkflowStep, WorkflowEventRecord};
use super::pool::{DbPool, DieselError};
use super::util::now_rfc3339;
use crate::schema::{workflow_event, workflow_step};
use crate::with_conn;

pub const STEP_COMPLETED: &str = "completed";

#[derive(Clone)]
pub struct WorkflowRepository {
    pool: DbPool,
}

impl WorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Output JSON of a step that already completed for this run.
    pub async fn completed_output(
        &self,
        run_id: &str,
        step_name: &str,
    ) -> Result<Option<String>, DieselError> {
        with_conn!(self.pool, conn, {
            workflow_step::table
                .find((run_id, step_name))
                .filter(workflow_step::status.eq(STEP_COMPLETED))
                .select(workflow_step::output_json)
                .first::<String>(&mut conn)
                .await
                .optional()
        })
    }

    /// Checkpoint a completed step. A second completion keeps the first output.
    pub async fn complete_step(
        &self,
        run_id: &str,
        step_name: &str,
        output_json: &str,
    ) -> Result<(), DieselError> {
        let now = now_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::insert_into(workflow_step::table)
                .values(&NewWorkflowStep {
                    run_id,
                    step_name,
                    status: STEP_COMPLETED,
                    output_json,
                    updated_at: &now,
                })
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    pub async fn append_event(
        &self,
        run_id: &str,
        step_name: &str,
        phase: &str,
        payload_json: &str,
    ) -> Result<(), DieselError> {
        let now = now_rfc3339();
        with_conn!(self.pool, conn, {
            diesel::insert_into(workflow_event::table)
                .values(&NewWorkflowEvent {
                    run_id,
                    step_name,
                    phase,
                    payload_json,
                    created_at: &now,
                })
                .execute(&mut conn)
                .await?;
            Ok(())
        })
    }

    /// Events of a run in insertion order.
    pub async fn list_events(&self, run_id: &str) -> Result<Vec<WorkflowEventRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            workflow_event::table
                .filter(workflow_event::run_id.eq(run_id))
                .order(workflow_event::event_id.asc())
                .select(WorkflowEventRecord::as_select())
                .load(&mut conn)
                .await
        })
    }
}
