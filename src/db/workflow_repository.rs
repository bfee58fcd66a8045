use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::workflow::{NewWorkflow, Workflow, WorkflowDefinition};
use crate::models::workflow_run::{
    ActionExecution, NewWorkflowRun, RunLogEntry, RunStatus, WorkflowRun,
};
use crate::models::workflow_schedule::WorkflowSchedule;
use crate::models::workflow_template::{NewWorkflowTemplate, WorkflowTemplate};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, sqlx::Error>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, sqlx::Error>;

    async fn find_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error>;

    async fn update_workflow(
        &self,
        workflow_id: Uuid,
        definition: WorkflowDefinition,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error>;

    async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error>;

    /// Deletes the workflow together with its runs and schedule.
    async fn delete_workflow(&self, workflow_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn rotate_webhook_salt(&self, workflow_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;

    async fn record_run_outcome(
        &self,
        workflow_id: Uuid,
        success: bool,
        finished_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error>;

    // Schedules
    async fn upsert_workflow_schedule(
        &self,
        workflow_id: Uuid,
        trigger_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error>;

    async fn disable_workflow_schedule(&self, workflow_id: Uuid) -> Result<(), sqlx::Error>;

    async fn get_schedule_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowSchedule>, sqlx::Error>;

    async fn list_due_schedules(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WorkflowSchedule>, sqlx::Error>;

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error>;

    // Runs
    async fn create_workflow_run(&self, new: NewWorkflowRun) -> Result<WorkflowRun, sqlx::Error>;

    async fn get_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<Option<WorkflowRun>, sqlx::Error>;

    /// Newest first. `workflow_id` of `None` spans every workflow.
    async fn list_runs_paged(
        &self,
        workflow_id: Option<Uuid>,
        statuses: Option<Vec<RunStatus>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error>;

    async fn list_runs_since(&self, since: OffsetDateTime)
        -> Result<Vec<WorkflowRun>, sqlx::Error>;

    /// Moves the oldest queued run to `running` and returns it.
    async fn claim_next_queued_run(&self) -> Result<Option<WorkflowRun>, sqlx::Error>;

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>, sqlx::Error>;

    async fn save_run_progress(
        &self,
        run_id: Uuid,
        executions: Vec<ActionExecution>,
        logs: Vec<RunLogEntry>,
    ) -> Result<(), sqlx::Error>;

    /// Finishes a run. Returns false when the run was already terminal.
    async fn complete_workflow_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool, sqlx::Error>;

    async fn cancel_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<bool, sqlx::Error>;

    // Retention
    async fn purge_old_runs(&self, retention_days: i32) -> Result<u64, sqlx::Error>;

    // Templates
    async fn create_template(
        &self,
        new: NewWorkflowTemplate,
    ) -> Result<WorkflowTemplate, sqlx::Error>;

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, sqlx::Error>;

    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error>;

    async fn update_template(
        &self,
        template_id: Uuid,
        update: NewWorkflowTemplate,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error>;

    async fn delete_template(&self, template_id: Uuid) -> Result<bool, sqlx::Error>;

    async fn increment_template_usage(&self, template_id: Uuid) -> Result<(), sqlx::Error>;
}
