use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::workflow_repository::WorkflowRepository;
use crate::models::workflow::{
    Action, NewWorkflow, Trigger, Workflow, WorkflowDefinition, WorkflowStats,
};
use crate::models::workflow_run::{
    ActionExecution, NewWorkflowRun, RunLogEntry, RunStatus, WorkflowRun,
};
use crate::models::workflow_schedule::WorkflowSchedule;
use crate::models::workflow_template::{NewWorkflowTemplate, WorkflowTemplate};

pub struct PostgresWorkflowRepository {
    pub pool: PgPool,
}

const WORKFLOW_COLUMNS: &str = "id, name, description, is_active, triggers, actions, \
     runs_total, runs_success, last_run_at, template_id, webhook_salt, created_at, updated_at";

const RUN_COLUMNS: &str = "id, workflow_id, status, triggered_by, trigger_data, started_at, \
     finished_at, executions, logs, error, created_at, updated_at";

const SCHEDULE_COLUMNS: &str = "id, workflow_id, trigger_id, config, next_run_at, last_run_at, \
     enabled, created_at, updated_at";

const TEMPLATE_COLUMNS: &str = "id, name, description, category, tags, triggers, actions, \
     usage_count, created_at, updated_at";

#[derive(FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    triggers: Json<Vec<Trigger>>,
    actions: Json<Vec<Action>>,
    runs_total: i64,
    runs_success: i64,
    last_run_at: Option<OffsetDateTime>,
    template_id: Option<Uuid>,
    webhook_salt: Uuid,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            triggers: row.triggers.0,
            actions: row.actions.0,
            stats: WorkflowStats {
                runs_total: row.runs_total,
                runs_success: row.runs_success,
                last_run: row.last_run_at,
            },
            template_id: row.template_id,
            webhook_salt: row.webhook_salt,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    workflow_id: Uuid,
    status: String,
    triggered_by: String,
    trigger_data: Value,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    executions: Json<Vec<ActionExecution>>,
    logs: Json<Vec<RunLogEntry>>,
    error: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

fn parse_status(raw: &str) -> Result<RunStatus, sqlx::Error> {
    raw.parse::<RunStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = sqlx::Error;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(WorkflowRun {
            id: row.id,
            workflow_id: row.workflow_id,
            status: parse_status(&row.status)?,
            triggered_by: row.triggered_by,
            trigger_data: row.trigger_data,
            started_at: row.started_at,
            finished_at: row.finished_at,
            executions: row.executions.0,
            logs: row.logs.0,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn runs_from_rows(rows: Vec<RunRow>) -> Result<Vec<WorkflowRun>, sqlx::Error> {
    rows.into_iter().map(WorkflowRun::try_from).collect()
}

#[derive(FromRow)]
struct ScheduleRow {
    id: Uuid,
    workflow_id: Uuid,
    trigger_id: Uuid,
    config: Value,
    next_run_at: Option<OffsetDateTime>,
    last_run_at: Option<OffsetDateTime>,
    enabled: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ScheduleRow> for WorkflowSchedule {
    fn from(row: ScheduleRow) -> Self {
        WorkflowSchedule {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_id: row.trigger_id,
            config: row.config,
            next_run_at: row.next_run_at,
            last_run_at: row.last_run_at,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    category: String,
    tags: Vec<String>,
    triggers: Json<Vec<Trigger>>,
    actions: Json<Vec<Action>>,
    usage_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TemplateRow> for WorkflowTemplate {
    fn from(row: TemplateRow) -> Self {
        WorkflowTemplate {
            id: row.id,
            name: row.name,
            description: row.description,
            category: row.category,
            tags: row.tags,
            triggers: row.triggers.0,
            actions: row.actions.0,
            usage_count: row.usage_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl WorkflowRepository for PostgresWorkflowRepository {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, sqlx::Error> {
        let NewWorkflow {
            definition,
            is_active,
            template_id,
        } = new;
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            INSERT INTO workflows (name, description, is_active, triggers, actions, template_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now(), now())
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(definition.name)
        .bind(definition.description)
        .bind(is_active)
        .bind(Json(definition.triggers))
        .bind(Json(definition.actions))
        .bind(template_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, sqlx::Error> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY updated_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Workflow::from).collect())
    }

    async fn find_workflow(&self, workflow_id: Uuid) -> Result<Option<Workflow>, sqlx::Error> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workflow::from))
    }

    async fn update_workflow(
        &self,
        workflow_id: Uuid,
        definition: WorkflowDefinition,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            UPDATE workflows
            SET name = $2,
                description = $3,
                triggers = $4,
                actions = $5,
                is_active = $6,
                updated_at = now()
            WHERE id = $1
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(workflow_id)
        .bind(definition.name)
        .bind(definition.description)
        .bind(Json(definition.triggers))
        .bind(Json(definition.actions))
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workflow::from))
    }

    async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        is_active: bool,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            UPDATE workflows
            SET is_active = $2, updated_at = now()
            WHERE id = $1
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(workflow_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workflow::from))
    }

    async fn delete_workflow(&self, workflow_id: Uuid) -> Result<bool, sqlx::Error> {
        // runs and schedules go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rotate_webhook_salt(&self, workflow_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE workflows
            SET webhook_salt = gen_random_uuid(), updated_at = now()
            WHERE id = $1
            RETURNING webhook_salt
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(salt,)| salt))
    }

    async fn record_run_outcome(
        &self,
        workflow_id: Uuid,
        success: bool,
        finished_at: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET runs_total = runs_total + 1,
                runs_success = runs_success + CASE WHEN $2 THEN 1 ELSE 0 END,
                last_run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(success)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_workflow_schedule(
        &self,
        workflow_id: Uuid,
        trigger_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_schedules (workflow_id, trigger_id, config, next_run_at, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4 IS NOT NULL, now(), now())
            ON CONFLICT (workflow_id) DO UPDATE
            SET trigger_id = EXCLUDED.trigger_id,
                config = EXCLUDED.config,
                next_run_at = EXCLUDED.next_run_at,
                enabled = EXCLUDED.enabled,
                updated_at = now()
            "#,
        )
        .bind(workflow_id)
        .bind(trigger_id)
        .bind(config)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn disable_workflow_schedule(&self, workflow_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET enabled = false, next_run_at = NULL, updated_at = now()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowSchedule>, sqlx::Error> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM workflow_schedules WHERE workflow_id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowSchedule::from))
    }

    async fn list_due_schedules(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<WorkflowSchedule>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM workflow_schedules
            WHERE enabled = true
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
            ORDER BY next_run_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WorkflowSchedule::from).collect())
    }

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET last_run_at = $2,
                next_run_at = $3,
                enabled = $3 IS NOT NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_workflow_run(&self, new: NewWorkflowRun) -> Result<WorkflowRun, sqlx::Error> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO workflow_runs (workflow_id, status, triggered_by, trigger_data, created_at, updated_at)
            VALUES ($1, 'queued', $2, $3, now(), now())
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(new.workflow_id)
        .bind(new.triggered_by)
        .bind(new.trigger_data)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<Option<WorkflowRun>, sqlx::Error> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1 AND workflow_id = $2"
        ))
        .bind(run_id)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRun::try_from).transpose()
    }

    async fn list_runs_paged(
        &self,
        workflow_id: Option<Uuid>,
        statuses: Option<Vec<RunStatus>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        let statuses: Option<Vec<String>> =
            statuses.map(|list| list.into_iter().map(|s| s.as_str().to_string()).collect());
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::text[] IS NULL OR status = ANY($2))
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(workflow_id)
        .bind(statuses)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        runs_from_rows(rows)
    }

    async fn list_runs_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<WorkflowRun>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE COALESCE(started_at, created_at) >= $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        runs_from_rows(rows)
    }

    async fn claim_next_queued_run(&self) -> Result<Option<WorkflowRun>, sqlx::Error> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            WITH sel AS (
              SELECT id
              FROM workflow_runs
              WHERE status = 'queued'
              ORDER BY created_at ASC
              LIMIT 1
              FOR UPDATE SKIP LOCKED
            )
            UPDATE workflow_runs wr
            SET status = 'running', started_at = now(), updated_at = now()
            FROM sel
            WHERE wr.id = sel.id
            RETURNING wr.id, wr.workflow_id, wr.status, wr.triggered_by, wr.trigger_data,
                      wr.started_at, wr.finished_at, wr.executions, wr.logs, wr.error,
                      wr.created_at, wr.updated_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRun::try_from).transpose()
    }

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<RunStatus>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String,)>("SELECT status FROM workflow_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(status,)| parse_status(&status)).transpose()
    }

    async fn save_run_progress(
        &self,
        run_id: Uuid,
        executions: Vec<ActionExecution>,
        logs: Vec<RunLogEntry>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET executions = $2, logs = $3, updated_at = now()
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(run_id)
        .bind(Json(executions))
        .bind(Json(logs))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_workflow_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                error = $3,
                started_at = COALESCE(started_at, now()),
                finished_at = COALESCE(finished_at, now()),
                updated_at = now()
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_workflow_run(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'canceled', finished_at = now(), updated_at = now()
            WHERE id = $1 AND workflow_id = $2 AND status IN ('queued', 'running')
            "#,
        )
        .bind(run_id)
        .bind(workflow_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_old_runs(&self, retention_days: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE status IN ('success', 'failed', 'canceled')
              AND created_at < now() - make_interval(days => $1)
            "#,
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_template(
        &self,
        new: NewWorkflowTemplate,
    ) -> Result<WorkflowTemplate, sqlx::Error> {
        let tags = new.normalized_tags();
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            r#"
            INSERT INTO workflow_templates (name, description, category, tags, triggers, actions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now(), now())
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(new.name)
        .bind(new.description)
        .bind(new.category)
        .bind(tags)
        .bind(Json(new.triggers))
        .bind(Json(new.actions))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates ORDER BY lower(name) ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WorkflowTemplate::from).collect())
    }

    async fn find_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates WHERE id = $1"
        ))
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowTemplate::from))
    }

    async fn update_template(
        &self,
        template_id: Uuid,
        update: NewWorkflowTemplate,
    ) -> Result<Option<WorkflowTemplate>, sqlx::Error> {
        let tags = update.normalized_tags();
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            r#"
            UPDATE workflow_templates
            SET name = $2,
                description = $3,
                category = $4,
                tags = $5,
                triggers = $6,
                actions = $7,
                updated_at = now()
            WHERE id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(template_id)
        .bind(update.name)
        .bind(update.description)
        .bind(update.category)
        .bind(tags)
        .bind(Json(update.triggers))
        .bind(Json(update.actions))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WorkflowTemplate::from))
    }

    async fn delete_template(&self, template_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflow_templates WHERE id = $1")
            .bind(template_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_template_usage(&self, template_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_templates SET usage_count = usage_count + 1 WHERE id = $1",
        )
        .bind(template_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
