//! Alibaba Cloud Container Registry.

mod api;
mod path;

use api::{ApiError, CrClient};

use crate::client::{ImageTag, RegionalClientCache, RegistryClient, RegistryError};
use crate::secret_string::SecretString;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const NAME: &str = "alicr";
const PAGE_SIZE: i64 = 30;

/// Credentials and endpoint overrides, fixed for the client's lifetime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    /// STS token for temporary credentials.
    #[serde(default)]
    pub security_token: Option<SecretString>,
    /// API region used regardless of the region in the image host.
    #[serde(default)]
    pub region: Option<String>,
    /// API endpoint template, `{region}` is substituted.
    #[serde(default)]
    pub endpoint: Option<String>,
}

pub struct Client {
    options: Options,
    http: reqwest::Client,
    host_pattern: Regex,
    regional_clients: RegionalClientCache<CrClient>,
}

impl Client {
    pub fn new(options: Options, http: reqwest::Client) -> anyhow::Result<Self> {
        Ok(Self {
            options,
            http,
            host_pattern: path::host_pattern()?,
            regional_clients: RegionalClientCache::new(),
        })
    }
}

#[async_trait]
impl RegistryClient for Client {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_host(&self, host: &str) -> bool {
        self.host_pattern.is_match(host)
    }

    fn repo_image_from_path(&self, path: &str) -> (String, String) {
        path::repo_image_from_path(path)
    }

    async fn tags(
        &self,
        cancel: &CancellationToken,
        host: &str,
        repo: &str,
        image: &str,
    ) -> Result<Vec<ImageTag>, RegistryError> {
        let host_region = path::region_from_host(&self.host_pattern, host).ok_or_else(|| {
            RegistryError::HostMismatch {
                provider: NAME,
                host: host.to_owned(),
            }
        })?;
        let region = self.options.region.as_deref().unwrap_or(host_region);

        let api = self
            .regional_clients
            .get_or_try_insert_with(region, |region| {
                CrClient::new(region, &self.options, self.http.clone())
            })
            .map_err(|source| RegistryError::ClientConstruction {
                provider: NAME,
                host: host.to_owned(),
                source: Box::new(source),
            })?;

        let mut tags = Vec::new();
        let mut page = 1;
        loop {
            let listing = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RegistryError::Cancelled { image: image.to_owned() });
                }
                listing = api.repo_tags(repo, image, page, PAGE_SIZE) => {
                    listing.map_err(|source| RegistryError::Tags {
                        image: image.to_owned(),
                        source: Box::new(source),
                    })?
                }
            };

            let fetched = listing.tags.len();
            tags.extend(listing.tags.into_iter().map(ImageTag::from));

            if listing.total - page * PAGE_SIZE <= 0 {
                break;
            }
            if fetched == 0 {
                return Err(RegistryError::Tags {
                    image: image.to_owned(),
                    source: Box::new(ApiError::EmptyPage {
                        page,
                        total: listing.total,
                    }),
                });
            }
            page += 1;
        }

        debug!(
            "Listed {} tags of {}/{} on {} in {} pages",
            tags.len(),
            repo,
            image,
            host,
            page
        );
        Ok(tags)
    }
}
