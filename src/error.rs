//! Error taxonomy. One enum per component boundary, matching the teacher's
//! `kube-client`/`kube-core` convention of a dedicated `Error` type per
//! crate rather than one global error type. `main` composes all of them
//! into `anyhow::Result` at the top level; everywhere else they stay typed.

use thiserror::Error;

/// Fatal initialization errors — surfaced by process termination.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("-host was empty and HOST_IP is not set")]
    MissingHost,
    #[error("failed to parse default duration flag {flag}: {source}")]
    BadDuration {
        flag: &'static str,
        #[source]
        source: kube::core::duration::ParseError,
    },
    #[error("-gw is required to push to a gateway")]
    MissingGateway,
    #[error("failed to parse -metrics-addr: {0}")]
    BadMetricsAddr(#[source] std::net::AddrParseError),
}

/// Errors building a [`crate::types::ReplicaRef`] or resolving its owner.
/// Annotation-parse failures are deliberately *not* part of this enum: per
/// spec.md §7 they degrade to "no spec" and are never surfaced as errors.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("pod has no uid")]
    MissingUid,
    #[error("pod has no namespace")]
    MissingNamespace,
    #[error("pod has neither owner references nor a kubernetes.io/created-by annotation")]
    NoOwnerFound,
    #[error("kubernetes.io/created-by annotation is not valid JSON: {0}")]
    CreatedByNotJson(#[source] serde_json::Error),
    #[error("kubernetes.io/created-by annotation is missing a .reference field")]
    CreatedByMissingReference,
}

/// A single scrape attempt failed. Counted, logged, never retried before
/// the next tick (spec.md §4.3).
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to build scrape request: {0}")]
    Request(#[source] http::Error),
    #[error("transport error: {0}")]
    Transport(#[source] hyper_util::client::legacy::Error),
    #[error("scrape endpoint returned {0}")]
    BadStatus(http::StatusCode),
    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
}

/// A single gateway push or delete failed. Counted, logged, never retried
/// (spec.md §4.4).
#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to build gateway request: {0}")]
    Request(#[source] http::Error),
    #[error("transport error: {0}")]
    Transport(#[source] hyper_util::client::legacy::Error),
    #[error("gateway returned {0}, expected 202")]
    BadStatus(http::StatusCode),
}

/// Best-effort annotation patch failed. Logged only; never blocks the push
/// that triggered it (spec.md §4.2).
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("kube api error: {0}")]
    Kube(#[source] kube::Error),
}
