use std::path::Path;
use std::sync::Arc;

use silo_host::metrics;
use silo_host::Error;
use silo_host::ProviderRegistry;
use silo_host::Result;
use silo_host::RetryDriver;
use silo_host::SiloConfig;
use silo_host::SiloController;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = SiloConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.cluster.silo_name, &settings.monitoring.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        tokio::spawn(metrics::start_server(
            settings.monitoring.prometheus_port,
            graceful_rx.clone(),
        ));
    }

    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let driver = RetryDriver::new(
        Arc::new(ProviderRegistry::builtin()),
        settings.lifecycle,
        settings.retry,
    );

    info!("Application started. Waiting for CTRL+C signal...");
    let attempt = driver
        .attempt_with(&settings.cluster, None, move |silo| serve(silo, graceful_rx))
        .await;

    if let Err(e) = &attempt.result {
        error!("silo stops: {}", e);
    }
    if !attempt.teardown.is_clean() {
        info!("teardown reclaimed leftovers: {:?}", attempt.teardown);
    }

    println!("Exiting program.");
    attempt.result
}

/// Keeps the silo running until shutdown is signalled.
async fn serve(
    mut silo: SiloController,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    silo.initialize()?;
    silo.start(false).await?;

    let cancelled = silo.cancellation_token();
    tokio::select! {
        _ = shutdown.changed() => info!("shutdown requested"),
        _ = cancelled.cancelled() => info!("attempt terminated"),
    }

    silo.stop().await
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

pub fn init_observability(
    silo_name: &str,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| Error::Fatal(format!("cannot create log dir {}: {}", log_dir.display(), e)))?;
    let log_file = tracing_appender::rolling::never(log_dir, format!("{silo_name}.log"));

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
