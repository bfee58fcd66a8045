pub mod cron;
pub mod filters;
pub mod format;
pub mod schedule;
pub mod stats;
pub mod validation;
pub mod webhook;
