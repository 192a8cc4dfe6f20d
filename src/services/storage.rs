use crate::models::KEY_FIELD;
use crate::services::post_policy::PostPolicySigner;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Target and signed fields for a browser-style form upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

#[async_trait]
pub trait WaveformStore: Send + Sync {
    /// Authorizes a single form upload of `key`.
    async fn presign_upload(&self, key: &str) -> Result<PresignedPost>;
    /// Returns `None` when no object is stored under `key`.
    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn health_check(&self) -> bool;
}

pub struct S3WaveformStore {
    client: Client,
    bucket: String,
    upload_base_url: String,
    signer: PostPolicySigner,
}

impl S3WaveformStore {
    pub fn new(
        client: Client,
        bucket: String,
        upload_base_url: String,
        signer: PostPolicySigner,
    ) -> Self {
        Self {
            client,
            bucket,
            upload_base_url,
            signer,
        }
    }
}

#[async_trait]
impl WaveformStore for S3WaveformStore {
    async fn presign_upload(&self, key: &str) -> Result<PresignedPost> {
        let fields = self.signer.sign(&self.bucket, key, Utc::now())?;
        Ok(PresignedPost {
            url: self.upload_base_url.clone(),
            fields,
        })
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(output) => {
                let data = output.body.collect().await?.to_vec();
                Ok(Some(data))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    tracing::error!(
                        "S3 get_object failed: bucket={}, key={}, error={:?}",
                        self.bucket,
                        key,
                        service_error
                    );
                    Err(anyhow!(service_error))
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
    }
}

/// Process-local store for development and tests. Uploads are received by the
/// backend's own `/uploads/` route instead of object storage.
pub struct MemoryWaveformStore {
    upload_base_url: String,
    files: DashMap<String, Vec<u8>>,
}

impl MemoryWaveformStore {
    pub fn new(upload_base_url: impl Into<String>) -> Self {
        Self {
            upload_base_url: upload_base_url.into(),
            files: DashMap::new(),
        }
    }

    pub fn put(&self, key: &str, data: Vec<u8>) {
        self.files.insert(key.to_string(), data);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }
}

#[async_trait]
impl WaveformStore for MemoryWaveformStore {
    async fn presign_upload(&self, key: &str) -> Result<PresignedPost> {
        Ok(PresignedPost {
            url: self.upload_base_url.clone(),
            fields: BTreeMap::from([(KEY_FIELD.to_string(), key.to_string())]),
        })
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(key).map(|data| data.value().clone()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
