use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::workflow_repository::WorkflowRepository;
use crate::models::workflow::{NewWorkflow, Workflow, WorkflowDefinition, WorkflowStats};
use crate::models::workflow_run::{
    ActionExecution, NewWorkflowRun, RunLogEntry, RunStatus, WorkflowRun,
};
use crate::models::workflow_schedule::WorkflowSchedule;
use crate::models::workflow_template::{NewWorkflowTemplate, WorkflowTemplate};

/// Process-local store used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
    schedules: RwLock<HashMap<Uuid, WorkflowSchedule>>,
    templates: RwLock<HashMap<Uuid, WorkflowTemplate>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(runs: &mut [WorkflowRun]) {
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let NewWorkflow {
            definition,
            is_active,
            template_id,
        } = new;
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            is_active,
            triggers: definition.triggers,
            actions: definition.actions,
            stats: WorkflowStats::default(),
            template_id,
            webhook_salt: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, sqlx::Error> {
        let mut list: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn find_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error> {
        Ok(self.workflows.read().await.get(&workflow_id).cloned())
    }

    async fn update_workflow(
        &self,
        workflow_id: Uuid,
        definition: WorkflowDefinition,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let mut workflows = self.workflows.write().await;
        let Some(wf) = workflows.get_mut(&workflow_id) else {
            return Ok(None);
        };
        wf.name = definition.name;
        wf.description = definition.description;
        wf.triggers = definition.triggers;
        wf.actions = definition.actions;
        wf.is_active = is_active;
        wf.updated_at = OffsetDateTime::now_utc();
        Ok(Some(wf.clone()))
    }

    async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let mut workflows = self.workflows.write().await;
        let Some(wf) = workflows.get_mut(&workflow_id) else {
            return Ok(None);
        };
        wf.is_active = is_active;
        wf.updated_at = OffsetDateTime::now_utc();
        Ok(Some(wf.clone()))
    }

    async fn delete_workflow(&self, workflow_id: Uuid) -> Result<bool, sqlx::Error> {
        let removed = self.workflows.write().await.remove(&workflow_id).is_some();
        if removed {
            self.runs
                .write()
                .await
                .retain(|_, run| run.workflow_id != workflow_id);
            self.schedules
                .write()
                .await
                .retain(|_, s| s.workflow_id != workflow_id);
        }
        Ok(removed)
    }

    async fn rotate_webhook_salt(&self, workflow_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        let mut workflows = self.workflows.write().await;
        Ok(workflows.get_mut(&workflow_id).map(|wf| {
            wf.webhook_salt = Uuid::new_v4();
            wf.updated_at = OffsetDateTime::now_utc();
            wf.webhook_salt
        }))
    }

    async fn record_run_outcome(
        &self,
        workflow_id: Uuid,
        success: bool,
        finished_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(&workflow_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        wf.stats.runs_total += 1;
        if success {
            wf.stats.runs_success += 1;
        }
        wf.stats.last_run = Some(finished_at);
        Ok(())
    }

    async fn upsert_workflow_schedule(
        &self,
        workflow_id: Uuid,
        trigger_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let mut schedules = self.schedules.write().await;
        let existing = schedules
            .values_mut()
            .find(|s| s.workflow_id == workflow_id);
        match existing {
            Some(schedule) => {
                schedule.trigger_id = trigger_id;
                schedule.config = config;
                schedule.next_run_at = next_run_at;
                schedule.enabled = next_run_at.is_some();
                schedule.updated_at = now;
            }
            None => {
                let schedule = WorkflowSchedule {
                    id: Uuid::new_v4(),
                    workflow_id,
                    trigger_id,
                    config,
                    next_run_at,
                    last_run_at: None,
                    enabled: next_run_at.is_some(),
                    created_at: now,
                    updated_at: now,
                };
                schedules.insert(schedule.id, schedule);
            }
        }
        Ok(())
    }

    async fn disable_workflow_schedule(&self, workflow_id: Uuid) -> Result<(), sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        for schedule in self
            .schedules
            .write()
            .await
            .values_mut()
            .filter(|s| s.workflow_id == workflow_id)
        {
            schedule.enabled = false;
            schedule.next_run_at = None;
            schedule.updated_at = now;
        }
        Ok(())
    }

    async fn get_schedule_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowSchedule>, sqlx::Error> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .find(|s| s.workflow_id == workflow_id)
            .cloned())
    }

    async fn list_due_schedules(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WorkflowSchedule>, sqlx::Error> {
        let mut due: Vec<WorkflowSchedule> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled && s.next_run_at.is_some_and(|next| next <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        schedule.last_run_at = Some(last_run_at);
        schedule.next_run_at = next_run_at;
        schedule.enabled = next_run_at.is_some();
        schedule.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn create_workflow_run(&self, new: NewWorkflowRun) -> Result<WorkflowRun, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            status: RunStatus::Queued,
            triggered_by: new.triggered_by,
            trigger_data: new.trigger_data,
            started_at: None,
            finished_at: None,
            executions: vec![],
            logs: vec![],
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<Option<WorkflowRun>, sqlx::Error> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id)
            .filter(|run| run.workflow_id == workflow_id)
            .cloned())
    }

    async fn list_runs_paged(
        &self,
        workflow_id: Option<Uuid>,
        statuses: Option<Vec<RunStatus>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| workflow_id.is_none_or(|id| run.workflow_id == id))
            .filter(|run| {
                statuses
                    .as_ref()
                    .is_none_or(|wanted| wanted.contains(&run.status))
            })
            .cloned()
            .collect();
        newest_first(&mut runs);
        Ok(runs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_runs_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.started_at.unwrap_or(run.created_at) >= since)
            .cloned()
            .collect();
        newest_first(&mut runs);
        Ok(runs)
    }

    async fn claim_next_queued_run(&self) -> Result<Option<WorkflowRun>, sqlx::Error> {
        let mut runs = self.runs.write().await;
        let next = runs
            .values_mut()
            .filter(|run| run.status == RunStatus::Queued)
            .min_by_key(|run| run.created_at);
        Ok(next.map(|run| {
            let now = OffsetDateTime::now_utc();
            run.status = RunStatus::Running;
            run.started_at = Some(now);
            run.updated_at = now;
            run.clone()
        }))
    }

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>, sqlx::Error> {
        Ok(self.runs.read().await.get(&run_id).map(|run| run.status))
    }

    async fn save_run_progress(
        &self,
        run_id: Uuid,
        executions: Vec<ActionExecution>,
        logs: Vec<RunLogEntry>,
    ) -> Result<(), sqlx::Error> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(sqlx::Error::RowNotFound)?;
        if run.status.is_terminal() {
            return Ok(());
        }
        run.executions = executions;
        run.logs = logs;
        run.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn complete_workflow_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool, sqlx::Error> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(sqlx::Error::RowNotFound)?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        let now = OffsetDateTime::now_utc();
        run.status = status;
        run.error = error;
        run.started_at.get_or_insert(now);
        run.finished_at = Some(now);
        run.updated_at = now;
        Ok(true)
    }

    async fn cancel_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run_id) {
            Some(run) if run.workflow_id == workflow_id && !run.status.is_terminal() => {
                let now = OffsetDateTime::now_utc();
                run.status = RunStatus::Canceled;
                run.finished_at = Some(now);
                run.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_old_runs(&self, retention_days: i32) -> Result<u64, sqlx::Error> {
        let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(retention_days));
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, run| !(run.status.is_terminal() && run.created_at < cutoff));
        Ok((before - runs.len()) as u64)
    }

    async fn create_template(
        &self,
        new: NewWorkflowTemplate,
    ) -> Result<WorkflowTemplate, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let tags = new.normalized_tags();
        let template = WorkflowTemplate {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            category: new.category,
            tags,
            triggers: new.triggers,
            actions: new.actions,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(template)
    }

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, sqlx::Error> {
        let mut list: Vec<WorkflowTemplate> =
            self.templates.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(list)
    }

    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        Ok(self.templates.read().await.get(&template_id).cloned())
    }

    async fn update_template(
        &self,
        template_id: Uuid,
        update: NewWorkflowTemplate,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        let mut templates = self.templates.write().await;
        let Some(tpl) = templates.get_mut(&template_id) else {
            return Ok(None);
        };
        tpl.tags = update.normalized_tags();
        tpl.name = update.name;
        tpl.description = update.description;
        tpl.category = update.category;
        tpl.triggers = update.triggers;
        tpl.actions = update.actions;
        tpl.updated_at = OffsetDateTime::now_utc();
        Ok(Some(tpl.clone()))
    }

    async fn delete_template(&self, template_id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(self.templates.write().await.remove(&template_id).is_some())
    }

    async fn increment_template_usage(&self, template_id: Uuid) -> Result<(), sqlx::Error> {
        let mut templates = self.templates.write().await;
        let tpl = templates
            .get_mut(&template_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        tpl.usage_count += 1;
        Ok(())
    }
}
