pub mod job_repo;
pub mod production_repo;

pub use job_repo::JobRepository;
pub use production_repo::{
    PeriodRange, ProductionRepository, ProductionStats, RecordPage, CSV_HEADERS,
};
