use async_trait::async_trait;
use bytes::Bytes;

use super::{network_failure, TileLoader};
use crate::error::TileError;

/// Fetches tiles over HTTP(S).
///
/// Tiles with POST data are requested with `POST` and a form-encoded body;
/// everything else is a plain `GET`. No client-side timeout is configured:
/// the scheduler owns the per-job deadline.
#[derive(Debug, Clone)]
pub struct HttpTileLoader {
    client: reqwest::Client,
}

impl HttpTileLoader {
    pub fn new() -> Result<Self, TileError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| network_failure("", format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use an existing client (shared connection pool, custom headers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TileLoader for HttpTileLoader {
    async fn load(&self, address: &str, post_data: Option<&str>) -> Result<Bytes, TileError> {
        let request = match post_data {
            Some(body) => self
                .client
                .post(address)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.to_string()),
            None => self.client.get(address),
        };

        let response = request
            .send()
            .await
            .map_err(|e| network_failure(address, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(network_failure(
                address,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| network_failure(address, format!("Failed to read response: {}", e)))
    }

    fn identifier(&self) -> &str {
        "http"
    }
}
