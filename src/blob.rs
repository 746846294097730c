//! Blob store client.
//!
//! Uploads raw artifact bytes to an S3-compatible object store at a stable
//! path-derived key. Requests are signed with AWS Signature V4 using
//! pure-Rust primitives (`hmac` + `sha2`), so the client works in any build
//! environment. Custom endpoints (MinIO, LocalStack) are supported.
//!
//! Credentials are read from the environment:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::BlobConfig;

type HmacSha256 = Hmac<Sha256>;

/// Upsert-by-key blob storage. The sync pipeline only needs put and
/// existence check; last write wins.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `body` at `key`, overwriting any existing object.
    async fn put(&self, key: &str, body: &[u8]) -> Result<()>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// S3-compatible implementation of [`BlobStore`].
pub struct S3BlobStore {
    config: BlobConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    /// Build a client, verifying credentials are present. Missing
    /// credentials are a configuration error and fatal for sync.
    pub fn new(config: &BlobConfig, timeout_secs: u64) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            creds,
            client,
        })
    }

    /// Scheme for request URLs. Custom endpoints keep their configured
    /// scheme so plain-http local stores (MinIO, LocalStack) work.
    fn scheme(&self) -> &'static str {
        match self.config.endpoint_url {
            Some(ref endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!(
                "{}.s3.{}.amazonaws.com",
                self.config.bucket, self.config.region
            )
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix.trim_end_matches('/'), key)
        }
    }

    /// Sign a request for `method` on `/key` and return the headers to
    /// attach (`Authorization`, `x-amz-date`, `x-amz-content-sha256`,
    /// and optionally `x-amz-security-token`).
    fn sign(&self, method: &str, encoded_key: &str, payload_hash: &str) -> Vec<(String, String)> {
        let host = self.host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n/{}\n\n{}\n{}\n{}",
            method, encoded_key, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out = vec![
            ("Authorization".to_string(), authorization),
            (
                "x-amz-content-sha256".to_string(),
                payload_hash.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(ref token) = self.creds.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        let encoded_key = object_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}://{}/{}", self.scheme(), self.host(), encoded_key);

        let payload_hash = hex_sha256(body);
        let headers = self.sign("PUT", &encoded_key, &payload_hash);

        let mut req = self.client.put(&url).body(body.to_vec());
        for (name, value) in &headers {
            req = req.header(name, value);
        }

        let resp = req.send().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to put s3://{}/{}: {}",
                self.config.bucket,
                object_key,
                e
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                object_key,
                body.chars().take(300).collect::<String>()
            );
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let object_key = self.object_key(key);
        let encoded_key = object_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("{}://{}/{}", self.scheme(), self.host(), encoded_key);

        let payload_hash = hex_sha256(b"");
        let headers = self.sign("HEAD", &encoded_key, &payload_hash);

        let mut req = self.client.head(&url);
        for (name, value) in &headers {
            req = req.header(name, value);
        }

        let resp = req.send().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to head s3://{}/{}: {}",
                self.config.bucket,
                object_key,
                e
            )
        })?;

        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => bail!(
                "S3 HeadObject failed (HTTP {}) for key '{}'",
                status,
                object_key
            ),
        }
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
