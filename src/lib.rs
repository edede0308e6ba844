pub mod commands;
pub mod config;
pub mod ingest;
pub mod jobs;
pub mod model;
pub mod session;
pub mod storage;

pub use config::{AppConfig, ConfigError, ImportConfig, SourceConfig};
pub use ingest::{BatchResult, DataStatus, ImportError, ImportPipeline};
pub use jobs::{ImportJob, ImportJobManager, JobError, JobSnapshot, JobStatus};
pub use model::{NaturalKey, ProductionRecord};
