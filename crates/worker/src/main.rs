use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use jobflow::api::{self, ApiState, MetricsState};
use jobflow::config::Config;
use jobflow::db;
use jobflow::jobs::Store;
use jobflow::metrics::MetricsSink;
use jobflow::worker::{Pool, PoolConfig, Reaper, Registry};

mod blob;
mod handlers;
mod mailer;

use blob::FsBlobStore;
use mailer::ConsoleMailer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(
        env = %cfg.app_env,
        workers = cfg.workers_count,
        poll_interval = ?cfg.poll_interval,
        "jobflow worker starting"
    );

    let pg = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pg).await?;
    }
    let store = Arc::new(Store::new(pg));
    info!("connected to database");

    let registry = Arc::new(Registry::new());
    let blob: Arc<dyn blob::BlobStore> = Arc::new(FsBlobStore::new(cfg.blob_root.clone()));
    let mailer = Arc::new(ConsoleMailer::new(cfg.resend_from_email.clone()));
    handlers::register_catalog(&registry, store.clone(), blob, mailer);
    info!(job_types = ?registry.job_types(), "handler catalog registered");

    let metrics = Arc::new(MetricsSink::default());

    let pool = Pool::new(
        store.clone(),
        registry.clone(),
        metrics.clone(),
        PoolConfig {
            num_workers: cfg.workers_count,
            poll_interval: cfg.poll_interval,
            batch_size: cfg.dispatch_batch_size,
        },
    );
    pool.start().await;

    let reaper = Reaper::new(store.clone(), cfg.reap_interval, cfg.max_job_run);
    reaper.start().await;

    // Bind listeners before blocking on signals so a bad port is a fatal
    // startup error with a non-zero exit.
    let shutdown = CancellationToken::new();

    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.http_port)).await?;
    info!(port = cfg.http_port, "http api listening");
    let api_app = api::router(ApiState {
        store: store.clone(),
        registry: registry.clone(),
    });
    let api_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let serve = axum::serve(api_listener, api_app)
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(err) = serve.await {
                error!(%err, "http api server failed");
            }
        }
    });

    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.metrics_port)).await?;
    info!(port = cfg.metrics_port, "metrics listening");
    let metrics_app = api::metrics_router(MetricsState {
        store: store.clone(),
        sink: metrics.clone(),
    });
    let metrics_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let serve = axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(err) = serve.await {
                error!(%err, "metrics server failed");
            }
        }
    });

    wait_for_signal().await;
    info!("shutdown signal received");

    shutdown.cancel();
    let _ = api_task.await;
    let _ = metrics_task.await;

    reaper.stop().await;
    pool.stop().await;
    store.close().await;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(err) => {
                    error!(%err, "installing SIGTERM handler failed");
                    let _ = ctrl_c.await;
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
