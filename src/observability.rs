//! Self-exposed metrics side-channel (spec.md §4.5): the sidecar's own
//! success/failure counters, served over `GET /metrics` in the same
//! text-exposition format it scrapes from its targets.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Counters for this sidecar's own scrape and push operations. Injected as
/// a collaborator rather than kept as process-wide statics (spec.md §9).
#[derive(Debug, Default)]
pub struct ScrapeMetrics {
    pub fetch_succeed: Counter,
    pub fetch_failed: Counter,
    pub push_succeed: Counter,
    pub push_failed: Counter,
}

impl ScrapeMetrics {
    /// Build a fresh counter set and a [`Registry`] it's wired into.
    pub fn new() -> (Arc<Self>, Registry) {
        let metrics = Arc::new(Self::default());
        let mut registry = Registry::default();
        registry.register(
            "fetch_prometheus_metrics_succeed_count",
            "Successful scrapes of monitored replicas",
            metrics.fetch_succeed.clone(),
        );
        registry.register(
            "fetch_prometheus_metrics_failed_count",
            "Failed scrapes of monitored replicas",
            metrics.fetch_failed.clone(),
        );
        registry.register(
            "push_prometheus_metrics_succeed_count",
            "Successful pushes to the remote gateway",
            metrics.push_succeed.clone(),
        );
        registry.register(
            "push_prometheus_metrics_failed_count",
            "Failed pushes to the remote gateway",
            metrics.push_failed.clone(),
        );
        (metrics, registry)
    }
}

/// Serve `GET /metrics` on `addr` until the process exits. Runs as its own
/// task; has no state beyond the shared [`Registry`] (spec.md §4.5).
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>) -> anyhow::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let mut buf = String::new();
                match encode(&mut buf, &registry) {
                    Ok(()) => (
                        axum::http::StatusCode::OK,
                        [("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
                        buf,
                    ),
                    Err(err) => {
                        tracing::error!(%err, "failed to encode metrics");
                        (
                            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                            [("content-type", "text/plain")],
                            String::new(),
                        )
                    }
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving self metrics");
    axum::serve(listener, app).await?;
    Ok(())
}
