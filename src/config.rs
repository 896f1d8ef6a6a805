//! CLI flags (spec.md §6), grounded on `original_source/main.go`'s
//! `initializeArg` flag set.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use kube::core::Duration as GoDuration;

use crate::error::ConfigError;
use crate::types::ScrapeDefaults;

/// Per-node sidecar that discovers Pod replicas, scrapes their Prometheus
/// endpoints, and forwards payloads to a remote gateway.
#[derive(Debug, Parser)]
#[command(name = "scrape-forwarder", version)]
pub struct Cli {
    /// Log verbosity: 0=error, 1=warn, 2=info, 3=debug, 4+=trace.
    #[arg(short = 'l', default_value_t = 2)]
    pub log_level: u8,

    /// Remote gateway address, host:port.
    #[arg(long = "gw")]
    pub gateway_addr: Option<String>,

    /// Push HTTP timeout, Go-style duration string.
    #[arg(long = "gwto", default_value = "30s")]
    pub gateway_timeout: String,

    /// Annotation key prefix used to match a replica's scrape annotations.
    #[arg(long = "tag", default_value = "io.collectbeat.metrics")]
    pub annotation_prefix: String,

    /// Push queue capacity.
    #[arg(long = "syncbuffer", default_value_t = 32)]
    pub sync_buffer: usize,

    /// This node's identity used to filter replicas. Falls back to
    /// `HOST_IP`; fatal if both are empty.
    #[arg(long = "host", env = "HOST_IP", default_value = "")]
    pub host: String,

    /// Default scrape interval, Go-style duration string.
    #[arg(long = "fi", default_value = "1m")]
    pub default_interval: String,

    /// Default scrape timeout, Go-style duration string.
    #[arg(long = "ft", default_value = "3s")]
    pub default_timeout: String,

    /// Default labeled namespace.
    #[arg(long = "lns", default_value = "")]
    pub labeled_namespace: String,

    /// Kubernetes API URL. Empty uses the ambient in-cluster/kubeconfig
    /// configuration, the way every teacher `examples/*.rs` binary does.
    #[arg(long = "k8saddr", default_value = "")]
    pub k8s_addr: String,

    /// Kubernetes bearer token.
    #[arg(long = "k8sbt", default_value = "")]
    pub k8s_bearer_token: String,

    /// Bind address for the self-exposed `/metrics` endpoint.
    #[arg(long = "metrics-addr", default_value = "127.0.0.1:9090")]
    pub metrics_addr: String,
}

/// Parsed, validated configuration derived from [`Cli`]. Fatal-init errors
/// surface here, before any task is spawned.
pub struct Config {
    pub log_level: u8,
    pub gateway_addr: Option<String>,
    pub gateway_timeout: Duration,
    pub annotation_prefix: String,
    pub sync_buffer: usize,
    pub host: String,
    pub defaults: ScrapeDefaults,
    pub k8s_addr: String,
    pub k8s_bearer_token: String,
    pub metrics_addr: SocketAddr,
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, ConfigError> {
        if cli.host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        let gateway_timeout = parse_duration("gwto", &cli.gateway_timeout)?;
        let default_interval = parse_duration("fi", &cli.default_interval)?;
        let default_timeout = parse_duration("ft", &cli.default_timeout)?;
        let metrics_addr = SocketAddr::from_str(&cli.metrics_addr).map_err(ConfigError::BadMetricsAddr)?;

        Ok(Self {
            log_level: cli.log_level,
            gateway_addr: (!cli.gateway_addr.clone().unwrap_or_default().is_empty())
                .then_some(cli.gateway_addr.unwrap_or_default()),
            gateway_timeout,
            annotation_prefix: cli.annotation_prefix,
            sync_buffer: cli.sync_buffer,
            host: cli.host,
            defaults: ScrapeDefaults {
                interval: default_interval,
                timeout: default_timeout,
                labeled_namespace: cli.labeled_namespace,
            },
            k8s_addr: cli.k8s_addr,
            k8s_bearer_token: cli.k8s_bearer_token,
            metrics_addr,
        })
    }
}

fn parse_duration(flag: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    GoDuration::from_str(raw)
        .map(Duration::from)
        .map_err(|source| ConfigError::BadDuration { flag, source })
}

/// Map `-l`'s integer verbosity onto a `tracing` filter, falling back to
/// `RUST_LOG` if that env var is set (teacher convention).
pub fn tracing_filter(log_level: u8) -> String {
    if std::env::var_os("RUST_LOG").is_some() {
        return std::env::var("RUST_LOG").unwrap();
    }
    match log_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
    .to_string()
}
