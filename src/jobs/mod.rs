pub mod manager;
pub mod model;

pub use manager::ImportJobManager;
pub use model::{ImportJob, JobError, JobSnapshot, JobStatus};
