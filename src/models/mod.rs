pub mod workflow;
pub mod workflow_run;
pub mod workflow_schedule;
pub mod workflow_stats;
pub mod workflow_template;
