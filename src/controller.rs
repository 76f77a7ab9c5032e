use crate::state::ControllerContext;
use anyhow::Context;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

static POD_PHASE_RUNNING: &str = "Running";

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s controller");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}

/// Lists running pods and syncs each of them, `concurrency` pods at a time.
/// Pod level failures are logged, only a failed listing aborts the run.
pub async fn run(ctx: ControllerContext) -> anyhow::Result<()> {
    let Ok(_guard) = ctx.run_lock.try_lock() else {
        info!("Previous scan still in progress, skipping this run");
        return Ok(());
    };

    let pods: Api<Pod> = match &ctx.namespace {
        Some(namespace) => Api::namespaced(ctx.kube_client.clone(), namespace),
        None => Api::all(ctx.kube_client.clone()),
    };

    let pod_list = pods
        .list(&ListParams::default())
        .await
        .context("Failed to list pods")?;

    let running: Vec<&Pod> = pod_list.items.iter().filter(|pod| is_running(pod)).collect();
    info!(
        "Checking container images of {} running pods ({} listed)",
        running.len(),
        pod_list.items.len()
    );

    let live = running.iter().map(|pod| pod_key(pod)).collect::<HashSet<_>>();
    ctx.metrics.prune_pods(&live);

    let failed = AtomicUsize::new(0);
    futures::stream::iter(running)
        .for_each_concurrent(ctx.concurrency, |pod| {
            let ctx = &ctx;
            let failed = &failed;
            async move {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                if let Err(e) = ctx.engine.sync(&ctx.cancel, pod).await {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!("{}", e);
                }
            }
        })
        .await;

    let failed = failed.into_inner();
    if failed > 0 {
        warn!("{} pods failed to sync, retrying on the next run", failed);
    } else {
        info!("Finished checking container images");
    }
    Ok(())
}

fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some(POD_PHASE_RUNNING)
}

fn pod_key(pod: &Pod) -> (String, String) {
    (
        pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_owned()),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}
