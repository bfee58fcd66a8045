pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod responses;
pub mod routes;
pub mod state;
pub mod utils;
pub mod worker;

pub use state::AppState;
