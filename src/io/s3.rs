use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;
use url::Url;

use super::{network_failure, TileLoader};
use crate::error::TileError;

/// Reads tiles from S3 or S3-compatible storage (MinIO, GCS, etc.).
///
/// Addresses may be full `s3://bucket/key` URLs, or plain keys that are
/// resolved against the loader's default bucket and prefix.
#[derive(Clone)]
pub struct S3TileLoader {
    client: Client,
    bucket: String,
    prefix: String,
    identifier: String,
}

impl S3TileLoader {
    /// Create a loader reading plain keys from `bucket`, under `prefix`.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let prefix = prefix.into();
        let identifier = format!("s3://{}/{}", bucket, prefix);
        Self {
            client,
            bucket,
            prefix,
            identifier,
        }
    }

    /// Get the default bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Split an address into `(bucket, key)`.
    fn locate(&self, address: &str) -> (String, String) {
        if let Ok(url) = Url::parse(address) {
            if url.scheme() == "s3" {
                if let Some(bucket) = url.host_str() {
                    let key = url.path().trim_start_matches('/').to_string();
                    return (bucket.to_string(), key);
                }
            }
        }

        let key = address.trim_start_matches('/');
        let key = if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        };
        (self.bucket.clone(), key)
    }
}

#[async_trait]
impl TileLoader for S3TileLoader {
    async fn load(&self, address: &str, _post_data: Option<&str>) -> Result<Bytes, TileError> {
        let (bucket, key) = self.locate(address);

        let resp = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if is_not_found {
                    network_failure(address, format!("s3://{}/{} not found", bucket, key))
                } else {
                    network_failure(address, e.to_string())
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| network_failure(address, e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// How to reach the bucket behind `s3://` descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint for S3-compatible stores (MinIO, etc.)
    pub endpoint: Option<String>,

    pub region: String,

    /// Bound on one GetObject call, retries included
    pub operation_timeout_ms: Option<u64>,
}

impl S3Settings {
    /// A blank endpoint counts as none, so an empty `DEEPZOOM_S3_ENDPOINT`
    /// falls back to AWS.
    pub fn new(endpoint: Option<&str>, region: impl Into<String>) -> Self {
        let endpoint = endpoint
            .map(|e| e.trim().trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        Self {
            endpoint,
            region: region.into(),
            operation_timeout_ms: None,
        }
    }

    pub fn with_operation_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.operation_timeout_ms = timeout_ms.filter(|&ms| ms > 0);
        self
    }

    /// Custom endpoints rarely resolve virtual-hosted bucket names.
    pub fn path_style(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Build a client from these settings and the ambient AWS credentials.
    pub async fn client(&self) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()));
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(ms) = self.operation_timeout_ms {
            loader = loader.timeout_config(
                aws_config::timeout::TimeoutConfig::builder()
                    .operation_timeout(Duration::from_millis(ms))
                    .build(),
            );
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.path_style())
            .build();
        Client::from_conf(s3_config)
    }
}

impl S3TileLoader {
    /// Connect to `bucket` and read plain keys under `prefix`.
    pub async fn connect(
        settings: &S3Settings,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        let loader = Self::new(settings.client().await, bucket, prefix);
        info!(
            loader = %loader.identifier,
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = %settings.region,
            path_style = settings.path_style(),
            "s3 loader ready"
        );
        loader
    }
}
