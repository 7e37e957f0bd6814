//! SQLite implementations of the core persistence ports

pub mod entity_repository;
pub mod execution_repository;
pub mod pool;
pub mod workflow_repository;

pub use entity_repository::SqliteEntityStore;
pub use execution_repository::SqliteExecutionRepository;
pub use pool::SqlitePool;
pub use workflow_repository::SqliteWorkflowRepository;
