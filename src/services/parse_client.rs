use crate::config::ClientConfig;
use crate::models::{DisplaySample, RawWaveform, Sample};
use crate::pipeline::error::PipelineError;
use crate::services::decimator::{decimate, validate_stride};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

/// One lead, 15 seconds at 500 Hz.
pub const EXPECTED_SAMPLES: usize = 7500;

/// Fetches the parsed samples of an uploaded file.
#[async_trait]
pub trait ParseClient: Send + Sync {
    async fn request_waveform(&self, file_name: &str) -> Result<RawWaveform, PipelineError>;

    /// Fetches the waveform and decimates it for plotting.
    async fn request_display_samples(
        &self,
        file_name: &str,
        stride: i64,
    ) -> Result<Vec<DisplaySample>, PipelineError> {
        validate_stride(stride)?;
        let raw = self.request_waveform(file_name).await?;
        decimate(&raw, stride)
    }
}

/// Takes the first lead out of the parser's nested-array response.
pub fn extract_first_lead(body: &Value) -> Result<RawWaveform, PipelineError> {
    let leads = body.as_array().ok_or_else(|| {
        PipelineError::MalformedWaveform("expected an array of leads".to_string())
    })?;
    let first = leads
        .first()
        .ok_or_else(|| PipelineError::MalformedWaveform("response contains no leads".to_string()))?;
    let values = first.as_array().ok_or_else(|| {
        PipelineError::MalformedWaveform("first lead is not an array of samples".to_string())
    })?;

    let samples = values
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| {
                PipelineError::MalformedWaveform(format!("sample {} is out of range", i))
            }),
            other => Err(PipelineError::MalformedWaveform(format!(
                "sample {} is not numeric: {}",
                i, other
            ))),
        })
        .collect::<Result<Vec<Sample>, _>>()?;

    Ok(RawWaveform::new(samples))
}

/// Calls `GET /parser?name=<name>` on the waveform backend.
pub struct HttpParseClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpParseClient {
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.http_client()?, config.endpoint("parser")?))
    }
}

#[async_trait]
impl ParseClient for HttpParseClient {
    async fn request_waveform(&self, file_name: &str) -> Result<RawWaveform, PipelineError> {
        let failed = |e: reqwest::Error| {
            error!("❌ Parse request for {} failed: {}", file_name, e);
            PipelineError::ParseFailed(e.to_string())
        };

        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[("name", file_name)])
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;

        let bytes = response.bytes().await.map_err(failed)?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::MalformedWaveform(format!("parser response is not JSON: {}", e))
        })?;

        let waveform = extract_first_lead(&body)?;
        if waveform.len() != EXPECTED_SAMPLES {
            debug!(
                "Waveform {} has {} samples (expected {})",
                file_name,
                waveform.len(),
                EXPECTED_SAMPLES
            );
        }

        info!("📈 Received {} samples for {}", waveform.len(), file_name);
        Ok(waveform)
    }
}
