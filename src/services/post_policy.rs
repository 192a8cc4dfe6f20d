//! AWS Signature V4 signing of S3 browser-based POST policies.
//!
//! The signed fields let a client upload one object straight to the bucket
//! with a multipart form, without holding storage credentials.

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone)]
pub struct PostPolicySigner {
    access_key: String,
    secret_key: String,
    region: String,
    expires_in: Duration,
    max_content_length: u64,
}

impl PostPolicySigner {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        expires_in: Duration,
        max_content_length: u64,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            expires_in,
            max_content_length,
        }
    }

    /// Returns the form fields for uploading `key` into `bucket`, signed as of `now`.
    pub fn sign(&self, bucket: &str, key: &str, now: DateTime<Utc>) -> Result<BTreeMap<String, String>> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let short_date = now.format("%Y%m%d").to_string();
        let credential = format!(
            "{}/{}/{}/s3/aws4_request",
            self.access_key, short_date, self.region
        );
        let expiration = (now + self.expires_in)
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();

        let policy = json!({
            "expiration": expiration,
            "conditions": [
                { "bucket": bucket },
                { "key": key },
                { "x-amz-algorithm": ALGORITHM },
                { "x-amz-credential": credential },
                { "x-amz-date": amz_date },
                ["content-length-range", 0, self.max_content_length],
            ],
        });
        let encoded_policy = STANDARD.encode(policy.to_string());

        let signing_key = derive_signing_key(&self.secret_key, &short_date, &self.region, "s3")?;
        let signature = hex::encode(hmac_sha256(&signing_key, encoded_policy.as_bytes())?);

        Ok(BTreeMap::from([
            ("key".to_string(), key.to_string()),
            ("policy".to_string(), encoded_policy),
            ("x-amz-algorithm".to_string(), ALGORITHM.to_string()),
            ("x-amz-credential".to_string(), credential),
            ("x-amz-date".to_string(), amz_date),
            ("x-amz-signature".to_string(), signature),
        ]))
    }
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
