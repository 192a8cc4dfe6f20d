use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use url::Url;

use crate::services::decimator::DEFAULT_STRIDE;

/// Settings for the pipeline client (presign, upload, parse)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the presigner/parser backend (default: "http://127.0.0.1:3000")
    pub api_base_url: String,

    /// Keep every Nth sample for display (default: 5)
    pub decimation_stride: i64,

    /// Timeout for each HTTP round trip in seconds (default: 30)
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000".to_string(),
            decimation_stride: DEFAULT_STRIDE,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            api_base_url: env::var("WAVEFORM_API_URL").unwrap_or(default.api_base_url),

            decimation_stride: env::var("DECIMATION_STRIDE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.decimation_stride),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_timeout_secs),
        }
    }

    /// Resolves `path` against the API base, keeping any base path prefix
    /// (e.g. an API gateway stage such as `/prod`).
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .with_context(|| format!("Invalid WAVEFORM_API_URL '{}'", self.api_base_url))?;
        Ok(base.join(path)?)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?)
    }
}

/// Where the backend keeps uploaded waveforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    /// In-process store with a local `/uploads/` receiver
    Memory,
}

/// Settings for the presigner/parser backend
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// "s3" or "memory" (default: "s3")
    pub storage_backend: StorageBackend,

    /// Largest accepted upload in bytes (default: 64 MB)
    pub max_upload_size: u64,

    /// Allowed CORS Origins (comma separated, default: "*")
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::S3,
            max_upload_size: 64 * 1024 * 1024, // 64 MB
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            storage_backend: match env::var("STORAGE_BACKEND") {
                Ok(v) if v.eq_ignore_ascii_case("memory") => StorageBackend::Memory,
                _ => default.storage_backend,
            },

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (in-memory storage)
    pub fn development() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            ..Self::default()
        }
    }
}

/// S3/MinIO connection settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,

    /// Signing region (default: "us-east-1")
    pub region: String,

    /// Use `https://<bucket>.<host>/` upload URLs instead of path-style (default: false)
    pub virtual_host: bool,

    /// Lifetime of a presigned upload in seconds (default: 3600)
    pub presign_expiry_secs: i64,
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?,
            access_key: env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?,
            secret_key: env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?,
            bucket: env::var("MINIO_BUCKET").context("MINIO_BUCKET must be set")?,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            virtual_host: env::var("S3_VIRTUAL_HOST")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
            presign_expiry_secs: env::var("PRESIGN_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        })
    }
}
