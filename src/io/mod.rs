//! Tile loaders.
//!
//! A [`TileLoader`] fetches the raw bytes behind a tile address. The
//! scheduler runs loaders on the tokio runtime, one call per job, and
//! applies its own deadline and cancellation around each call, so loaders
//! only need to report transport failures.
//!
//! | Loader | Addresses |
//! |---|---|
//! | [`FsTileLoader`] | paths relative to a root directory |
//! | [`HttpTileLoader`] | absolute `http(s)://` URLs |
//! | [`S3TileLoader`] | `s3://bucket/key` URLs or keys under a default bucket |

mod fs;
mod http;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TileError;

pub use fs::FsTileLoader;
pub use http::HttpTileLoader;
pub use s3::{S3Settings, S3TileLoader};

/// Fetches tile payloads.
#[async_trait]
pub trait TileLoader: Send + Sync {
    /// Fetch the bytes at `address`.
    ///
    /// `post_data` is the request body for sources that address tiles by
    /// POST; loaders that cannot send a body ignore it.
    async fn load(&self, address: &str, post_data: Option<&str>) -> Result<Bytes, TileError>;

    /// Short name used in log lines.
    fn identifier(&self) -> &str;
}

/// Shorthand for a transport failure at `address`.
pub(crate) fn network_failure(address: &str, message: impl Into<String>) -> TileError {
    TileError::NetworkFailure {
        address: address.to_string(),
        message: message.into(),
    }
}
