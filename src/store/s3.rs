//! S3 and S3-compatible (OSS) stores via `aws-sdk-s3`.
//!
//! Both schemes share one implementation; they differ only in how the
//! client is configured. `s3` uses the default AWS credential chain,
//! `oss` uses an explicit endpoint with its own key pair and
//! virtual-hosted addressing.

use super::{RemoteStore, StoreError, StoreErrorKind};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Endpoint and key pair for an S3-compatible OSS deployment.
#[derive(Clone)]
pub struct OssCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region: String,
}

impl std::fmt::Debug for OssCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OssCredentials")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

impl OssCredentials {
    /// Read `OSS_ENDPOINT`, `OSS_ACCESS_KEY_ID`, `OSS_ACCESS_KEY_SECRET` and
    /// optionally `OSS_REGION`. Returns `None` unless the first three are set.
    pub fn from_env() -> Option<Self> {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self {
            endpoint: get("OSS_ENDPOINT")?,
            access_key_id: get("OSS_ACCESS_KEY_ID")?,
            access_key_secret: get("OSS_ACCESS_KEY_SECRET")?,
            region: get("OSS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

pub struct S3Store {
    client: Client,
    label: &'static str,
}

impl S3Store {
    /// AWS S3 with credentials and region from the environment.
    pub async fn from_env() -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self {
            client: Client::new(&shared),
            label: "s3",
        }
    }

    /// An S3-compatible OSS endpoint.
    pub fn oss(creds: OssCredentials) -> Self {
        let credentials = Credentials::new(
            &creds.access_key_id,
            &creds.access_key_secret,
            None,
            None,
            "pdf2md-oss",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .credentials_provider(credentials)
            .region(Region::new(creds.region))
            .endpoint_url(creds.endpoint)
            .force_path_style(false)
            .build();
        Self {
            client: Client::from_conf(config),
            label: "oss",
        }
    }

    /// Wrap an already-configured client.
    pub fn with_client(client: Client, label: &'static str) -> Self {
        Self { client, label }
    }
}

/// Map an SDK failure onto the store taxonomy.
fn classify<E>(err: &SdkError<E, HttpResponse>) -> StoreErrorKind {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StoreErrorKind::Transient
        }
        SdkError::ServiceError(ctx) => match ctx.raw().status().as_u16() {
            404 => StoreErrorKind::NotFound,
            401 | 403 => StoreErrorKind::PermissionDenied,
            429 | 500..=599 => StoreErrorKind::Transient,
            _ => StoreErrorKind::Other,
        },
        _ => StoreErrorKind::Other,
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> StoreError
where
    E: std::error::Error + 'static,
{
    let kind = classify(&err);
    StoreError::new(kind, DisplayErrorContext(err).to_string())
}

#[async_trait]
impl RemoteStore for S3Store {
    fn name(&self) -> &str {
        self.label
    }

    async fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;

        // Stream into a sibling `.part` file, then rename over the target.
        let part = super::part_path(local);
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| StoreError::from_io(&e, &part))?;
        let mut body = resp.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StoreError::new(StoreErrorKind::Transient, e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| StoreError::from_io(&e, &part))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| StoreError::from_io(&e, &part))?;
        drop(file);

        tokio::fs::rename(&part, local)
            .await
            .map_err(|e| StoreError::from_io(&e, local))?;

        debug!(
            "{}: downloaded {}/{} ({} bytes) → {}",
            self.label,
            bucket,
            key,
            written,
            local.display()
        );
        Ok(())
    }

    async fn upload(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StoreError::new(StoreErrorKind::Other, format!("{}: {}", local.display(), e)))?;

        let content_type = match local.extension().and_then(|e| e.to_str()) {
            Some("md") => "text/markdown; charset=utf-8",
            Some("json") => "application/json",
            _ => "application/octet-stream",
        };

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(sdk_error)?;

        debug!("{}: uploaded {} → {}/{}", self.label, local.display(), bucket, key);
        Ok(())
    }
}
