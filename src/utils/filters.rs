use serde::Deserialize;

use crate::models::workflow::Workflow;
use crate::models::workflow_run::{RunStatus, WorkflowRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatusFilter {
    #[default]
    All,
    Active,
    Inactive,
}

impl WorkflowStatusFilter {
    fn matches(self, workflow: &Workflow) -> bool {
        match self {
            Self::All => true,
            Self::Active => workflow.is_active,
            Self::Inactive => !workflow.is_active,
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Case-insensitive match on name or description. A blank search matches all.
pub fn filter_workflows<'a>(
    workflows: &'a [Workflow],
    search: &str,
    status: WorkflowStatusFilter,
) -> Vec<&'a Workflow> {
    let needle = search.trim().to_lowercase();
    workflows
        .iter()
        .filter(|wf| status.matches(wf))
        .filter(|wf| {
            needle.is_empty()
                || contains_ci(&wf.name, &needle)
                || wf
                    .description
                    .as_deref()
                    .is_some_and(|d| contains_ci(d, &needle))
        })
        .collect()
}

/// Matches `triggered_by` or any executed action name.
pub fn filter_runs<'a>(
    runs: &'a [WorkflowRun],
    search: &str,
    status: Option<RunStatus>,
) -> Vec<&'a WorkflowRun> {
    let needle = search.trim().to_lowercase();
    runs.iter()
        .filter(|run| status.is_none_or(|s| run.status == s))
        .filter(|run| {
            needle.is_empty()
                || contains_ci(&run.triggered_by, &needle)
                || run
                    .executions
                    .iter()
                    .any(|exec| contains_ci(&exec.action_name, &needle))
        })
        .collect()
}
