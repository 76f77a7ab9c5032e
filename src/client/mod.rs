//! Uniform tag listing over cloud container registries.
//!
//! Every provider implements [`RegistryClient`]; [`Registries`] holds the
//! configured set and picks the one whose host grammar matches an image.

pub mod alicr;
mod cache;
mod http;
mod selector;

pub use cache::RegionalClientCache;
pub use http::create_http_client;
pub use selector::Registries;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single tag listing entry. `tag` is empty for digests without a human tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub sha: String,
    pub tag: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Provider identifier used in logs.
    fn name(&self) -> &'static str;

    /// Whether `host` belongs to this provider. Never touches the network.
    fn is_host(&self, host: &str) -> bool;

    /// Splits an image path into (repository namespace, image name) at the last `/`.
    fn repo_image_from_path(&self, path: &str) -> (String, String);

    /// Lists every tag of `repo/image` on `host`. Either the full listing or an error.
    async fn tags(
        &self,
        cancel: &CancellationToken,
        host: &str,
        repo: &str,
        image: &str,
    ) -> Result<Vec<ImageTag>, RegistryError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{provider} client not suitable for image host: {host}")]
    HostMismatch { provider: &'static str, host: String },

    #[error("failed to construct {provider} client for image host {host}: {source}")]
    ClientConstruction {
        provider: &'static str,
        host: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to get repo tags of image {image}: {source}")]
    Tags {
        image: String,
        #[source]
        source: BoxError,
    },

    #[error("listing tags of image {image} was cancelled")]
    Cancelled { image: String },
}
