mod crud;
mod events;
mod helpers;
mod lifecycle;
mod prelude;
mod runs;
mod sse;
mod stats;
mod webhooks;

pub(crate) use helpers::load_workflow;

pub use crud::{create_workflow, delete_workflow, get_workflow, list_workflows, update_workflow};
pub use events::emit_event;
pub use lifecycle::{activate_workflow, deactivate_workflow, duplicate_workflow};
pub use runs::{
    cancel_workflow_run, get_workflow_run, list_recent_runs, list_runs_for_workflow,
    start_workflow_run,
};
pub use sse::sse_run_events;
pub use stats::get_workflow_stats;
pub use webhooks::{get_webhook_url, regenerate_webhook_token, webhook_trigger};
