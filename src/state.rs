use crate::config::Config;
use crate::db::workflow_repository::WorkflowRepository;
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub workflow_repo: Arc<dyn WorkflowRepository>,
    pub http_client: Arc<Client>,
    pub config: Arc<Config>,
    pub worker_id: Arc<String>,
}

#[cfg(test)]
impl AppState {
    /// State over a fresh in-memory store.
    pub fn for_tests() -> Self {
        Self::with_repo(Arc::new(
            crate::db::in_memory_workflow_repository::InMemoryWorkflowRepository::new(),
        ))
    }

    pub fn with_repo(workflow_repo: Arc<dyn WorkflowRepository>) -> Self {
        AppState {
            workflow_repo,
            http_client: Arc::new(Client::new()),
            config: Arc::new(Config::default()),
            worker_id: Arc::new("test-worker".to_string()),
        }
    }
}
