use crate::metrics::Metrics;
use crate::sync::SyncEngine;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ControllerContext {
    pub(crate) kube_client: kube::Client,
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) namespace: Option<String>,
    pub(crate) concurrency: usize,
    pub(crate) cancel: CancellationToken,
    /// Held for the duration of one scan so scheduled runs never overlap.
    pub(crate) run_lock: Arc<Mutex<()>>,
}
