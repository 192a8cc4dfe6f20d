use crate::config::{ServerConfig, StorageConfig};
use crate::services::post_policy::PostPolicySigner;
use crate::services::storage::S3WaveformStore;
use anyhow::{Context, Result};
use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::info;
use url::Url;

pub async fn setup_storage(
    storage: &StorageConfig,
    server: &ServerConfig,
) -> Result<Arc<S3WaveformStore>> {
    info!(
        "☁️  S3 Storage: {} (Bucket: {})",
        storage.endpoint, storage.bucket
    );

    let aws_config = aws_config::from_env()
        .endpoint_url(&storage.endpoint)
        .region(Region::new(storage.region.clone()))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            storage.access_key.clone(),
            storage.secret_key.clone(),
            None,
            None,
            "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(!storage.virtual_host)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(&storage.bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", storage.bucket),
        Err(e) => tracing::warn!(
            "⚠️  Bucket '{}' is not reachable yet: {}",
            storage.bucket,
            e
        ),
    }

    let upload_base_url = upload_base_url(&storage.endpoint, &storage.bucket, storage.virtual_host)?;
    info!("📮 Browser uploads go to {}", upload_base_url);

    let signer = PostPolicySigner::new(
        storage.access_key.clone(),
        storage.secret_key.clone(),
        storage.region.clone(),
        chrono::Duration::seconds(storage.presign_expiry_secs),
        server.max_upload_size,
    );

    Ok(Arc::new(S3WaveformStore::new(
        s3_client,
        storage.bucket.clone(),
        upload_base_url,
        signer,
    )))
}

/// Form POST target for the bucket. Always ends with `/` so that appending an
/// object key yields the object's URL.
pub fn upload_base_url(endpoint: &str, bucket: &str, virtual_host: bool) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("Invalid MINIO_ENDPOINT '{}'", endpoint))?;

    if !virtual_host {
        return Ok(format!("{}/{}/", endpoint.trim_end_matches('/'), bucket));
    }

    let host = url
        .host_str()
        .with_context(|| format!("MINIO_ENDPOINT '{}' has no host", endpoint))?;
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Ok(format!("{}://{}.{}{}/", url.scheme(), bucket, host, port))
}
