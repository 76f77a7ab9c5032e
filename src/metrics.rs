use crate::checker::SyncResult;
use anyhow::{Context, Result};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const LABELS: [&str; 6] = [
    "namespace",
    "pod",
    "container",
    "image",
    "current_version",
    "latest_version",
];

/// Where container check outcomes are recorded.
pub trait MetricsSink: Send + Sync {
    fn add_image(&self, namespace: &str, pod: &str, container: &str, result: &SyncResult);
    fn remove_image(&self, namespace: &str, pod: &str, container: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContainerKey {
    namespace: String,
    pod: String,
    container: String,
}

/// Prometheus backed sink. Keeps the label values of every live series so a
/// container always has at most one.
pub struct Metrics {
    registry: Registry,
    is_latest: GaugeVec,
    series: Mutex<HashMap<ContainerKey, Vec<String>>>,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let is_latest = GaugeVec::new(
            Opts::new(
                "version_checker_is_latest_version",
                "Where the container in use is using the latest upstream registry version",
            ),
            &LABELS,
        )
        .context("Failed to create is_latest_version gauge")?;
        registry
            .register(Box::new(is_latest.clone()))
            .context("Failed to register is_latest_version gauge")?;

        Ok(Self {
            registry,
            is_latest,
            series: Mutex::new(HashMap::new()),
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }

    /// Drops every series of pods not in `live` (namespace, pod name).
    pub fn prune_pods(&self, live: &HashSet<(String, String)>) {
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        series.retain(|key, labels| {
            let keep = live.contains(&(key.namespace.clone(), key.pod.clone()));
            if !keep {
                debug!(
                    "Removing metrics of deleted pod {}/{} container {}",
                    key.namespace, key.pod, key.container
                );
                self.remove_series(labels);
            }
            keep
        });
    }

    fn remove_series(&self, labels: &[String]) {
        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        if let Err(e) = self.is_latest.remove_label_values(&values) {
            debug!("Series already gone: {}", e);
        }
    }
}

impl MetricsSink for Metrics {
    fn add_image(&self, namespace: &str, pod: &str, container: &str, result: &SyncResult) {
        let key = ContainerKey {
            namespace: namespace.to_owned(),
            pod: pod.to_owned(),
            container: container.to_owned(),
        };
        let labels = vec![
            namespace.to_owned(),
            pod.to_owned(),
            container.to_owned(),
            result.image_url.clone(),
            result.current_version.clone(),
            result.latest_version.clone(),
        ];

        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = series.get(&key) {
            if *previous != labels {
                self.remove_series(previous);
            }
        }

        let values: Vec<&str> = labels.iter().map(String::as_str).collect();
        let value = if result.is_latest { 1.0 } else { 0.0 };
        self.is_latest.with_label_values(&values).set(value);
        series.insert(key, labels);
    }

    fn remove_image(&self, namespace: &str, pod: &str, container: &str) {
        let key = ContainerKey {
            namespace: namespace.to_owned(),
            pod: pod.to_owned(),
            container: container.to_owned(),
        };
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(labels) = series.remove(&key) {
            debug!(
                "Removing metrics of {}/{} container {}",
                namespace, pod, container
            );
            self.remove_series(&labels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(current: &str, latest: &str) -> SyncResult {
        SyncResult {
            image_url: "registry.cn-hangzhou.aliyuncs.com/team/app".to_owned(),
            is_latest: current == latest,
            current_version: current.to_owned(),
            latest_version: latest.to_owned(),
        }
    }

    fn series_count(metrics: &Metrics) -> usize {
        metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }

    #[test]
    fn test_add_image_is_exposed() {
        let metrics = Metrics::new().unwrap();
        metrics.add_image("default", "web-0", "app", &result("v1", "v2"));

        let text = metrics.encode().unwrap();
        assert!(text.contains("version_checker_is_latest_version{"), "{}", text);
        assert!(text.contains(r#"current_version="v1""#), "{}", text);
        assert!(text.contains(r#"latest_version="v2""#), "{}", text);
        assert!(text.contains(r#"pod="web-0""#), "{}", text);
        assert_eq!(series_count(&metrics), 1);
    }

    #[test]
    fn test_new_versions_replace_the_series() {
        let metrics = Metrics::new().unwrap();
        metrics.add_image("default", "web-0", "app", &result("v1", "v2"));
        metrics.add_image("default", "web-0", "app", &result("v2", "v2"));
        metrics.add_image("default", "web-0", "sidecar", &result("v1", "v1"));

        assert_eq!(series_count(&metrics), 2);
        let text = metrics.encode().unwrap();
        assert!(!text.contains(r#"current_version="v1",image="registry.cn-hangzhou.aliyuncs.com/team/app",latest_version="v2""#));
    }

    #[test]
    fn test_remove_image() {
        let metrics = Metrics::new().unwrap();
        metrics.add_image("default", "web-0", "app", &result("v1", "v2"));
        metrics.remove_image("default", "web-0", "app");
        metrics.remove_image("default", "web-0", "never-added");

        assert_eq!(series_count(&metrics), 0);
    }

    #[test]
    fn test_prune_pods() {
        let metrics = Metrics::new().unwrap();
        metrics.add_image("default", "web-0", "app", &result("v1", "v2"));
        metrics.add_image("default", "web-1", "app", &result("v1", "v2"));
        metrics.add_image("jobs", "web-0", "app", &result("v1", "v2"));

        let live = HashSet::from([("default".to_owned(), "web-1".to_owned())]);
        metrics.prune_pods(&live);

        assert_eq!(series_count(&metrics), 1);
        assert!(metrics.encode().unwrap().contains(r#"pod="web-1""#));
    }
}
