pub mod in_memory_workflow_repository;
pub mod pool;
pub mod postgres_workflow_repository;
pub mod workflow_repository;
