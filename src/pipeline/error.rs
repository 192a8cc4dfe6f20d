use thiserror::Error;

/// Failures of the upload-parse-visualize pipeline.
///
/// `PresignFailed`, `TransportAborted` and `ParseFailed` are transient and end
/// the run in `Failed`. `MalformedWaveform`, `InvalidStride` and
/// `EmptyFileName` are contract violations and are raised as soon as they are
/// detected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Upload aborted: {0}")]
    TransportAborted(String),

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Malformed waveform: {0}")]
    MalformedWaveform(String),

    #[error("Invalid decimation stride {0}: must be a positive integer")]
    InvalidStride(i64),

    #[error("File name cannot be empty")]
    EmptyFileName,
}

impl PipelineError {
    /// True for errors caused by a broken contract rather than a failed round trip.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedWaveform(_)
                | PipelineError::InvalidStride(_)
                | PipelineError::EmptyFileName
        )
    }
}
