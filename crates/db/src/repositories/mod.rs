//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod annotation_repo;
pub mod batch_repo;
pub mod render_unit_repo;
pub mod task_repo;
pub mod variable_pool_repo;
pub mod worker_repo;
pub mod workflow_repo;

pub use annotation_repo::AnnotationRepo;
pub use batch_repo::BatchRepo;
pub use render_unit_repo::RenderUnitRepo;
pub use task_repo::TaskRepo;
pub use variable_pool_repo::VariablePoolRepo;
pub use worker_repo::WorkerRepo;
pub use workflow_repo::WorkflowRepo;
