pub mod import_job;
pub mod well_production;

pub use import_job::Entity as ImportJobEntity;
pub use well_production::Entity as WellProduction;
