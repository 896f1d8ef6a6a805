//! Composition root. Parses flags, builds the Kubernetes client and shared
//! HTTP client, wires the channels described in spec.md §5, and spawns the
//! Watch Adapter, Reconciler-driving loop, Push Forwarder, annotator, and
//! self-metrics server as independent tasks. Grounded on
//! `original_source/main.go`'s top-level wiring, translated into
//! `tokio::select!`-based shutdown the way the teacher's `examples/*.rs`
//! binaries wire `tokio::signal::ctrl_c()`.

mod config;
mod error;
mod http_client;
mod observability;
mod owner;
mod push;
mod reconciler;
mod scrape;
mod shape;
mod types;
mod watch;

use std::sync::Arc;

use clap::Parser;
use config::{Cli, Config};
use observability::ScrapeMetrics;
use reconciler::Reconciler;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::try_from(cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config::tracing_filter(cfg.log_level)))
        .init();

    let gateway_addr = cfg.gateway_addr.clone().ok_or(error::ConfigError::MissingGateway)?;

    let client = watch::build_client(&cfg).await?;
    let (metrics, registry) = ScrapeMetrics::new();
    let registry = Arc::new(registry);

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let (push_tx, push_rx) = async_channel::bounded(cfg.sync_buffer);
    let (annotate_tx, annotate_rx) = mpsc::channel(cfg.sync_buffer);

    let scrape_http_client = http_client::build(cfg.defaults.timeout);
    let push_http_client = http_client::build(cfg.gateway_timeout);

    let reconciler = Arc::new(Reconciler::new(
        scrape_http_client,
        push_tx,
        annotate_tx,
        metrics.clone(),
        cfg.host.clone(),
    ));

    let watch_host = cfg.host.clone();
    let annotation_prefix = cfg.annotation_prefix.clone();
    let defaults = cfg.defaults.clone();
    let watch_client = client.clone();
    let watch_task = tokio::spawn(async move {
        watch::run(watch_client, &watch_host, &annotation_prefix, &defaults, event_tx).await;
    });

    let reconciler_task = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                reconciler.apply(event).await;
            }
        })
    };

    let push_task = tokio::spawn(push::run(
        push_http_client,
        gateway_addr,
        push_rx,
        metrics.clone(),
        cfg.gateway_timeout,
    ));

    let annotator_task = tokio::spawn(owner::run_annotator(client, annotate_rx));

    let metrics_addr = cfg.metrics_addr;
    let metrics_task = tokio::spawn(observability::serve(metrics_addr, registry));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
        result = terminate_signal() => {
            if let Err(err) = result {
                tracing::warn!(%err, "failed to install SIGTERM handler");
            }
            tracing::info!("received terminate signal, shutting down");
        }
        result = watch_task => {
            tracing::error!(?result, "watch adapter exited unexpectedly");
        }
        result = reconciler_task => {
            tracing::error!(?result, "reconciler loop exited unexpectedly");
        }
        result = push_task => {
            tracing::error!(?result, "push forwarder exited unexpectedly");
        }
        result = annotator_task => {
            tracing::error!(?result, "annotator task exited unexpectedly");
        }
        result = metrics_task => {
            tracing::error!(?result, "metrics server exited unexpectedly");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() -> anyhow::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> anyhow::Result<()> {
    std::future::pending().await
}
