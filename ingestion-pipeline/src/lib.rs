pub mod normalize;
pub mod pipeline;
pub mod report;

pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
pub use report::IngestReport;
