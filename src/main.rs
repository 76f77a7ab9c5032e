use crate::checker::TagChecker;
use crate::client::{Registries, alicr};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::state::ControllerContext;
use crate::sync::SyncEngine;
use anyhow::Context;
use std::env;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod checker;
mod client;
mod config;
mod controller;
mod image_reference;
mod metrics;
mod options;
mod secret_string;
mod state;
mod sync;
mod webserver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-version-checker {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "/app/config.yaml".to_string());
    let config = config::load_config(&config_path)?;

    let registries = create_registries(&config)?;
    let metrics = Arc::new(Metrics::new()?);
    let engine = Arc::new(SyncEngine::new(
        Arc::new(TagChecker::new(registries)),
        metrics.clone(),
        config.default_test_all,
    ));

    let cancel = CancellationToken::new();
    let ctx = ControllerContext {
        kube_client: controller::create_client().await?,
        engine,
        metrics: metrics.clone(),
        namespace: config.namespace.clone(),
        concurrency: config.concurrency,
        cancel: cancel.clone(),
        run_lock: Default::default(),
    };

    info!(
        "Executing job scheduler at cron schedule {}",
        config.cron_schedule
    );
    let mut scheduler = JobScheduler::new().await?;
    let job = Job::new_async(config.cron_schedule.clone(), move |_uuid, _l| {
        let ctx = ctx.clone();
        Box::pin(async move {
            if let Err(e) = controller::run(ctx).await {
                tracing::error!("Error running controller job: {:?}", e);
            }
        })
    })
    .context("Failed to create scheduled job")?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    let app = webserver::create_app(metrics);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    scheduler.shutdown().await?;
    info!("Stopped kube-version-checker");
    Ok(())
}

fn create_registries(config: &Config) -> anyhow::Result<Registries> {
    let http_client = client::create_http_client(&config.tls)?;
    let mut registries = Registries::new();

    if let Some(options) = &config.registries.alicr {
        registries.register(Arc::new(alicr::Client::new(options.clone(), http_client)?));
    }

    if registries.names().is_empty() {
        warn!("No registry credentials configured, no container will be reported");
    } else {
        info!("Configured registry clients: {}", registries.names().join(", "));
    }
    Ok(registries)
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, cancelling in-flight checks");
    cancel.cancel();
}
