use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("silo_attempts_total", "Startup attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref LIFECYCLE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("silo_lifecycle_transitions_total", "Lifecycle transitions by target state"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref PROVIDER_RESOLUTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("silo_provider_resolutions_total", "Membership provider resolutions by result"),
        &["result"]
    )
    .expect("metric can not be created");

    pub static ref START_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("silo_start_latency_ms", "Time spent attaching to cluster membership in ms")
            .buckets(exponential_buckets(1.0, 2.0, 16).expect("valid buckets")),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref FORCED_RELEASES: IntCounter = IntCounter::new(
        "silo_forced_releases_total",
        "Providers detached by boundary teardown instead of their controller"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(ATTEMPTS_TOTAL.clone()))?;
    registry.register(Box::new(LIFECYCLE_TRANSITIONS.clone()))?;
    registry.register(Box::new(PROVIDER_RESOLUTIONS.clone()))?;
    registry.register(Box::new(START_LATENCY.clone()))?;
    registry.register(Box::new(FORCED_RELEASES.clone()))?;
    Ok(())
}

/// Text exposition of everything registered in `registry`.
pub fn render(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    if let Err(e) = register_custom_metrics(&REGISTRY) {
        error!("failed to register metrics: {}", e);
        return;
    }

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("metrics server listening on port {}", port);
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render(&REGISTRY))
}
