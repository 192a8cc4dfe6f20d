use crate::config::ClientConfig;
use crate::models::{PresignResponse, PresignedDestination, UploadRequest};
use crate::pipeline::error::PipelineError;
use async_trait::async_trait;
use tracing::{error, info};
use url::Url;

/// Obtains a one-time upload destination for a file name.
#[async_trait]
pub trait PresignClient: Send + Sync {
    async fn request_destination(
        &self,
        request: &UploadRequest,
    ) -> Result<PresignedDestination, PipelineError>;
}

/// Calls `GET /presigner?name=<name>` on the waveform backend.
pub struct HttpPresignClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpPresignClient {
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.http_client()?, config.endpoint("presigner")?))
    }
}

#[async_trait]
impl PresignClient for HttpPresignClient {
    async fn request_destination(
        &self,
        request: &UploadRequest,
    ) -> Result<PresignedDestination, PipelineError> {
        let name = request.desired_name();
        let failed = |e: reqwest::Error| {
            error!("❌ Presign request for {} failed: {}", name, e);
            PipelineError::PresignFailed(e.to_string())
        };

        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[("name", name)])
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;

        let body: PresignResponse = response.json().await.map_err(failed)?;

        let destination = PresignedDestination::from_response(body).ok_or_else(|| {
            PipelineError::PresignFailed(format!("presign response for {} has no key field", name))
        })?;

        info!(
            "🔏 Upload destination for {}: {}",
            name, destination.resulting_file_locator
        );
        Ok(destination)
    }
}
