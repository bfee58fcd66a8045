pub mod actions;
mod executor;
mod templating;

pub use executor::{execute_run, ExecutorError};
