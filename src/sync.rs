use crate::checker::{CheckError, Checker};
use crate::metrics::MetricsSink;
use crate::options::{Builder, Options};
use k8s_openapi::api::core::v1::{Container, Pod};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span};

/// One or more containers of a pod failed. Sibling containers were still processed.
#[derive(Debug, Error)]
#[error("failed to sync pod {name}/{namespace}: {}", .errors.join(","))]
pub struct SyncError {
    pub name: String,
    pub namespace: String,
    pub errors: Vec<String>,
}

/// Ordered per-container failures of one pod sync.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Vec<String>,
}

impl ErrorAggregator {
    pub fn push(&mut self, message: String) {
        self.errors.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self, name: &str, namespace: &str) -> Result<(), SyncError> {
        if self.is_empty() {
            return Ok(());
        }
        Err(SyncError {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            errors: self.errors,
        })
    }
}

pub struct SyncEngine {
    checker: Arc<dyn Checker>,
    metrics: Arc<dyn MetricsSink>,
    default_test_all: bool,
}

impl SyncEngine {
    pub fn new(
        checker: Arc<dyn Checker>,
        metrics: Arc<dyn MetricsSink>,
        default_test_all: bool,
    ) -> Self {
        Self {
            checker,
            metrics,
            default_test_all,
        }
    }

    /// Checks every container of `pod` and records the outcome.
    pub async fn sync(&self, cancel: &CancellationToken, pod: &Pod) -> Result<(), SyncError> {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let span = info_span!("sync", pod = name, namespace);

        async move {
            let builder = Builder::new(pod.metadata.annotations.as_ref());
            let containers = pod
                .spec
                .as_ref()
                .map(|spec| spec.containers.as_slice())
                .unwrap_or_default();

            let mut errors = ErrorAggregator::default();
            for container in containers {
                if let Err(e) = self
                    .sync_container(cancel, &builder, pod, name, namespace, container)
                    .await
                {
                    errors.push(e);
                }
            }

            errors.into_result(name, namespace)
        }
        .instrument(span)
        .await
    }

    async fn sync_container(
        &self,
        cancel: &CancellationToken,
        builder: &Builder<'_>,
        pod: &Pod,
        name: &str,
        namespace: &str,
        container: &Container,
    ) -> Result<(), String> {
        if !builder.is_enabled(self.default_test_all, &container.name) {
            self.metrics.remove_image(namespace, name, &container.name);
            return Ok(());
        }

        let opts = builder.options(&container.name).map_err(|e| {
            format!(
                "failed to build options from annotations for {:?}: {}",
                container.name, e
            )
        })?;

        let span = info_span!("container", container = %container.name);
        async {
            debug!("Processing container image");
            match self.check_container(cancel, pod, name, namespace, container, &opts).await {
                // Nothing to retry until the registry or the filters change
                Err(e) if e.is_no_version_found() => {
                    error!("{}", e);
                    Ok(())
                }
                Err(e) => Err(format!(
                    "failed to check container image {:?}: {}",
                    container.name, e
                )),
                Ok(()) => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    async fn check_container(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
        name: &str,
        namespace: &str,
        container: &Container,
        opts: &Options,
    ) -> Result<(), CheckError> {
        let Some(result) = self.checker.container(cancel, pod, container, opts).await? else {
            return Ok(());
        };

        if result.is_latest {
            debug!(
                "Image is latest {}:{}",
                result.image_url, result.current_version
            );
        } else {
            debug!(
                "Image is not latest {}: {} -> {}",
                result.image_url, result.current_version, result.latest_version
            );
        }

        self.metrics
            .add_image(namespace, name, &container.name, &result);
        Ok(())
    }
}
