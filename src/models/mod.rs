use crate::pipeline::error::PipelineError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Form field that names the object key inside a presigned POST.
pub const KEY_FIELD: &str = "key";

/// A client's request for an upload destination. Consumed once by the presign client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    desired_name: String,
}

impl UploadRequest {
    pub fn new(desired_name: impl Into<String>) -> Result<Self, PipelineError> {
        let desired_name = desired_name.into();
        if desired_name.is_empty() {
            return Err(PipelineError::EmptyFileName);
        }
        Ok(Self { desired_name })
    }

    pub fn desired_name(&self) -> &str {
        &self.desired_name
    }
}

/// Wire body of `GET /presigner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PresignResponse {
    /// Form POST target (bucket base URL, ends with `/`)
    pub url: String,
    /// Fields to submit verbatim ahead of the file part
    pub fields: BTreeMap<String, String>,
}

/// One-time upload target handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedDestination {
    pub upload_url: String,
    pub form_fields: BTreeMap<String, String>,
    pub resulting_file_locator: String,
}

impl PresignedDestination {
    /// Builds a destination from the presigner's answer. Returns `None` when the
    /// fields carry no `key`, since the file locator cannot be derived without it.
    pub fn from_response(response: PresignResponse) -> Option<Self> {
        let key = response.fields.get(KEY_FIELD)?;
        let resulting_file_locator = format!("{}{}", response.url, key);
        Some(Self {
            upload_url: response.url,
            form_fields: response.fields,
            resulting_file_locator,
        })
    }
}

/// A sample as delivered by the parser. `None` stands for a JSON `null`
/// (NaN or infinity in the stored array) and is passed through untouched.
pub type Sample = Option<f64>;

/// Single-lead signal returned by the parsing service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawWaveform {
    samples: Vec<Sample>,
}

impl RawWaveform {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f64>> for RawWaveform {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values.into_iter().map(Some).collect())
    }
}

/// A point ready for plotting: the original sample index and its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DisplaySample {
    pub index: usize,
    #[schema(value_type = Option<f64>)]
    pub value: Sample,
}

/// The file blob chosen by the user.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Status values reported by the upload transport, in the order they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSignal {
    Preparing,
    Uploading,
    /// Storage accepted the upload
    HeadersReceived,
    /// Upload failed or was refused
    Aborted,
}
