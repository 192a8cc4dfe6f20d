use crate::models::{PresignedDestination, SelectedFile, TransportSignal};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// Moves a file to its presigned destination and reports progress.
///
/// Implementations send `Preparing`, `Uploading`, then exactly one of
/// `HeadersReceived` or `Aborted` on `signals`.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn submit(
        &self,
        destination: &PresignedDestination,
        file: &SelectedFile,
        signals: UnboundedSender<TransportSignal>,
    );

    /// Removes the in-flight record for `file_name`.
    fn release(&self, file_name: &str);
}

/// Multipart form POST straight to object storage.
pub struct FormUploadTransport {
    http: reqwest::Client,
    in_flight: DashMap<String, String>,
}

impl FormUploadTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            in_flight: DashMap::new(),
        }
    }

    pub fn is_in_flight(&self, file_name: &str) -> bool {
        self.in_flight.contains_key(file_name)
    }

    fn build_form(destination: &PresignedDestination, file: &SelectedFile) -> Form {
        // S3 ignores any field that follows the file part
        let form = destination
            .form_fields
            .iter()
            .fold(Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            });
        let part = Part::bytes(file.bytes.to_vec()).file_name(file.name.clone());
        form.part("file", part)
    }
}

#[async_trait]
impl UploadTransport for FormUploadTransport {
    async fn submit(
        &self,
        destination: &PresignedDestination,
        file: &SelectedFile,
        signals: UnboundedSender<TransportSignal>,
    ) {
        match self.in_flight.entry(file.name.clone()) {
            Entry::Occupied(_) => {
                warn!("⚠️  {} is already being uploaded, refusing resubmission", file.name);
                let _ = signals.send(TransportSignal::Aborted);
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(destination.resulting_file_locator.clone());
            }
        }

        let _ = signals.send(TransportSignal::Preparing);
        let form = Self::build_form(destination, file);

        let _ = signals.send(TransportSignal::Uploading);
        info!(
            "📤 Uploading {} ({} bytes) to {}",
            file.name,
            file.bytes.len(),
            destination.upload_url
        );

        let outcome = self
            .http
            .post(&destination.upload_url)
            .multipart(form)
            .send()
            .await;

        let signal = match outcome {
            Ok(response) if response.status().is_success() => {
                info!("✅ {} uploaded!", file.name);
                TransportSignal::HeadersReceived
            }
            Ok(response) => {
                error!(
                    "❌ {}, upload failed with status {}",
                    file.name,
                    response.status()
                );
                TransportSignal::Aborted
            }
            Err(e) => {
                error!("❌ {}, upload failed: {}", file.name, e);
                TransportSignal::Aborted
            }
        };

        // A failed attempt is over; only manual re-selection may retry it
        if signal == TransportSignal::Aborted {
            self.release(&file.name);
        }
        let _ = signals.send(signal);
    }

    fn release(&self, file_name: &str) {
        if self.in_flight.remove(file_name).is_some() {
            tracing::debug!("Released in-flight record for {}", file_name);
        }
    }
}
