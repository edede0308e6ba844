pub mod model;
pub mod pipeline;
pub mod transform;

pub use model::{BatchResult, DataStatus, ImportError, ImportEvent, PageResult, ValidationError};
pub use pipeline::ImportPipeline;
pub use transform::{parse_period, transform_row};
