//! The upload-parse-visualize pipeline: a pure state machine plus the driver
//! that performs its effects.

pub mod driver;
pub mod error;
pub mod state;

pub use driver::UploadPipeline;
pub use error::PipelineError;
pub use state::{RunId, RunSnapshot, UploadStatus};
