use crate::client::{ImageTag, Registries, RegistryError};
use crate::image_reference::{ImageReference, ParseError};
use crate::options::Options;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of one container check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub image_url: String,
    pub is_latest: bool,
    pub current_version: String,
    pub latest_version: String,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no tag of {image} satisfies the configured search criteria")]
    NoVersionFound { image: String },
    #[error("failed to parse image {image:?}: {source}")]
    InvalidImage {
        image: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CheckError {
    pub fn is_no_version_found(&self) -> bool {
        matches!(self, CheckError::NoVersionFound { .. })
    }
}

#[async_trait]
pub trait Checker: Send + Sync {
    /// `Ok(None)` means there is nothing to report yet.
    async fn container(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
        container: &Container,
        opts: &Options,
    ) -> Result<Option<SyncResult>, CheckError>;
}

/// Compares the running image with the newest tag in its registry.
pub struct TagChecker {
    registries: Registries,
}

impl TagChecker {
    pub fn new(registries: Registries) -> Self {
        Self { registries }
    }
}

#[async_trait]
impl Checker for TagChecker {
    async fn container(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
        container: &Container,
        opts: &Options,
    ) -> Result<Option<SyncResult>, CheckError> {
        let image_str = container.image.as_deref().unwrap_or_default();
        let image = parse(image_str)?;
        let lookup = match &opts.override_url {
            Some(url) => parse(url)?,
            None => image.clone(),
        };

        let Some(client) = self.registries.for_host(&lookup.host) else {
            debug!("No registry client supports host {}, skipping", lookup.host);
            return Ok(None);
        };

        // Digest pinned images carry no tag to compare, only their digest
        let digest_mode = opts.use_sha || (image.digest.is_some() && image.tag.is_none());
        let current_digest = if digest_mode {
            let current = image
                .digest
                .clone()
                .or_else(|| status_digest(pod, &container.name));
            let Some(current) = current else {
                debug!("Image digest of {} not known yet", image);
                return Ok(None);
            };
            Some(current)
        } else {
            None
        };

        let (repo, name) = client.repo_image_from_path(&lookup.path);
        let tags = client.tags(cancel, &lookup.host, &repo, &name).await?;
        let no_version = || CheckError::NoVersionFound {
            image: lookup.url(),
        };

        if let Some(current) = current_digest {
            let candidates = tags.iter().filter(|tag| {
                opts.match_regex
                    .as_ref()
                    .is_none_or(|regex| regex.is_match(&tag.tag))
            });
            let latest = newest(candidates).ok_or_else(no_version)?;
            return Ok(Some(SyncResult {
                image_url: image.url(),
                is_latest: current == latest.sha,
                current_version: current,
                latest_version: latest.sha.clone(),
            }));
        }

        let current_tag = image.tag_or_default();
        let candidates = tags.iter().filter(|tag| {
            !tag.tag.is_empty()
                && opts
                    .match_regex
                    .as_ref()
                    .is_none_or(|regex| regex.is_match(&tag.tag))
        });
        let latest = newest(candidates).ok_or_else(no_version)?;

        // A moved tag such as `latest` is current when it points at the newest digest
        let current_sha = tags
            .iter()
            .find(|tag| tag.tag == current_tag)
            .map(|tag| tag.sha.as_str());
        let is_latest = latest.tag == current_tag || current_sha == Some(latest.sha.as_str());

        Ok(Some(SyncResult {
            image_url: image.url(),
            is_latest,
            current_version: current_tag.to_owned(),
            latest_version: latest.tag.clone(),
        }))
    }
}

fn parse(image: &str) -> Result<ImageReference, CheckError> {
    ImageReference::parse(image).map_err(|source| CheckError::InvalidImage {
        image: image.to_owned(),
        source,
    })
}

/// Newest tag by timestamp, the earlier entry wins a tie.
fn newest<'t>(tags: impl Iterator<Item = &'t ImageTag>) -> Option<&'t ImageTag> {
    tags.reduce(|best, tag| {
        if tag.timestamp > best.timestamp {
            tag
        } else {
            best
        }
    })
}

/// Digest the kubelet resolved for `container_name`, from `imageID`.
fn status_digest(pod: &Pod, container_name: &str) -> Option<String> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    let status = statuses.iter().find(|s| s.name == container_name)?;
    let (_, digest) = status.image_id.split_once('@')?;
    Some(digest.to_owned())
}
