use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRunCount {
    /// Calendar day in UTC, `YYYY-MM-DD`.
    pub date: String,
    pub total: i64,
    pub success: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunSummary {
    pub workflow_id: Uuid,
    pub name: String,
    pub runs: i64,
    pub success: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatsReport {
    pub days: i64,
    pub total_workflows: i64,
    pub active_workflows: i64,
    pub runs_total: i64,
    pub runs_success: i64,
    pub runs_failed: i64,
    pub runs_canceled: i64,
    pub runs_in_progress: i64,
    pub success_rate: f64,
    pub avg_duration_ms: Option<i64>,
    pub daily: Vec<DailyRunCount>,
    pub top_workflows: Vec<WorkflowRunSummary>,
}
