use crate::models::{DisplaySample, RawWaveform};
use crate::pipeline::error::PipelineError;

/// 7500 samples (15 s at 500 Hz) become 1500 plotted points.
pub const DEFAULT_STRIDE: i64 = 5;

/// Checks a decimation stride and returns it as a step size.
pub fn validate_stride(stride: i64) -> Result<usize, PipelineError> {
    if stride <= 0 {
        return Err(PipelineError::InvalidStride(stride));
    }
    usize::try_from(stride).map_err(|_| PipelineError::InvalidStride(stride))
}

/// Keeps every sample whose index is a multiple of `stride`.
///
/// This is plain decimation: the dropped samples are not averaged or
/// interpolated into the kept ones. Null samples at kept indices are passed
/// through as-is.
pub fn decimate(raw: &RawWaveform, stride: i64) -> Result<Vec<DisplaySample>, PipelineError> {
    let step = validate_stride(stride)?;

    Ok(raw
        .samples()
        .iter()
        .copied()
        .enumerate()
        .step_by(step)
        .map(|(index, value)| DisplaySample { index, value })
        .collect())
}
